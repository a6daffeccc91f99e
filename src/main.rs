fn main() -> anyhow::Result<()> {
    cardline::cli::run()
}
