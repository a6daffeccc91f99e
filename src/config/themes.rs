use std::collections::HashMap;

use ratatui::style::Color;

use super::ThemeName;

/// Colors the timeline and editor are drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: Color,
    pub stripe: Color,
    pub text: Color,
    pub muted: Color,
    pub accent: Color,
    pub in_progress: Color,
    pub completed: Color,
    pub warning: Color,
    pub error: Color,
}

impl Palette {
    /// Blends `color` toward the background; `opacity` 1.0 keeps it as is.
    pub fn fade(&self, color: Color, opacity: f32) -> Color {
        match (color, self.background) {
            (Color::Rgb(r, g, b), Color::Rgb(br, bg, bb)) => {
                let mix = |fg: u8, bg: u8| {
                    let opacity = opacity.clamp(0.0, 1.0);
                    (fg as f32 * opacity + bg as f32 * (1.0 - opacity)).round() as u8
                };
                Color::Rgb(mix(r, br), mix(g, bg), mix(b, bb))
            }
            _ if opacity < 1.0 => self.muted,
            _ => color,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThemeRegistry {
    palettes: HashMap<ThemeName, Palette>,
}

impl ThemeRegistry {
    pub fn contains(&self, theme: &ThemeName) -> bool {
        self.palettes.contains_key(theme)
    }

    pub fn palette(&self, theme: &ThemeName) -> Palette {
        self.palettes
            .get(theme)
            .copied()
            .unwrap_or_else(dark_palette)
    }
}

impl Default for ThemeRegistry {
    fn default() -> Self {
        let palettes = [
            (ThemeName::Dark, dark_palette()),
            (ThemeName::Light, light_palette()),
        ]
        .into_iter()
        .collect();
        Self { palettes }
    }
}

fn dark_palette() -> Palette {
    Palette {
        background: Color::Rgb(0x10, 0x20, 0x26),
        stripe: Color::Rgb(0x1a, 0x2e, 0x36),
        text: Color::Rgb(0xe6, 0xed, 0xf0),
        muted: Color::Rgb(0x6b, 0x7f, 0x88),
        accent: Color::Rgb(0x4f, 0xa3, 0xd1),
        in_progress: Color::Rgb(0xf2, 0xb1, 0x34),
        completed: Color::Rgb(0x3f, 0xb9, 0x83),
        warning: Color::Rgb(0xf2, 0xb1, 0x34),
        error: Color::Rgb(0xe5, 0x53, 0x4b),
    }
}

fn light_palette() -> Palette {
    Palette {
        background: Color::Rgb(0xfa, 0xfa, 0xf7),
        stripe: Color::Rgb(0xec, 0xee, 0xea),
        text: Color::Rgb(0x1d, 0x24, 0x27),
        muted: Color::Rgb(0x8a, 0x93, 0x96),
        accent: Color::Rgb(0x1f, 0x6f, 0xb2),
        in_progress: Color::Rgb(0xd9, 0x82, 0x0b),
        completed: Color::Rgb(0x1e, 0x8a, 0x5a),
        warning: Color::Rgb(0xd9, 0x82, 0x0b),
        error: Color::Rgb(0xc2, 0x2f, 0x28),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fading_blends_toward_the_background() {
        let palette = ThemeRegistry::default().palette(&ThemeName::Dark);
        assert_eq!(palette.fade(palette.completed, 1.0), palette.completed);
        assert_eq!(palette.fade(palette.completed, 0.0), palette.background);
        assert_ne!(palette.fade(palette.completed, 0.3), palette.completed);
        assert_eq!(palette.fade(Color::Red, 0.3), palette.muted);
    }
}
