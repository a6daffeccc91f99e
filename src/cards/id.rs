use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

use super::Card;

pub const ID_LENGTH: usize = 6;

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{6}$").expect("valid card id pattern"));

pub fn is_canonical_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

fn random_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ID_LENGTH)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Draws random ids until one is not used by any card in `existing`.
///
/// The loop only terminates if a free id exists; with 36^6 possible ids and
/// collections held in memory that is always the case in practice.
pub fn mint_unique_id<R: Rng + ?Sized>(existing: &[Card], rng: &mut R) -> String {
    let mut attempts = 0usize;
    loop {
        let candidate = random_id(rng);
        attempts += 1;
        if !existing.iter().any(|card| card.id == candidate) {
            if attempts > 1 {
                tracing::debug!(attempts, id = %candidate, "minted card id after collisions");
            }
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn minted_ids_use_the_canonical_alphabet() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let id = mint_unique_id(&[], &mut rng);
            assert!(is_canonical_id(&id), "unexpected id {id}");
        }
    }

    #[test]
    fn minting_skips_ids_already_taken() {
        // Replay the same seed to learn which ids the generator yields first,
        // then occupy them so the minter has to keep drawing.
        let mut seeded = StdRng::seed_from_u64(42);
        let taken: Vec<Card> = (0..50).map(|_| Card::new(random_id(&mut seeded))).collect();

        let mut rng = StdRng::seed_from_u64(42);
        let id = mint_unique_id(&taken, &mut rng);
        assert!(is_canonical_id(&id));
        assert!(taken.iter().all(|card| card.id != id));
    }

    #[test]
    fn legacy_ids_are_not_canonical() {
        assert!(is_canonical_id("A1B2C3"));
        assert!(!is_canonical_id("a1b2c3"));
        assert!(!is_canonical_id("NEW_CARD"));
        assert!(!is_canonical_id("ABC"));
    }
}
