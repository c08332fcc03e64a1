use anyhow::Result;

fn main() -> Result<()> {
    learnbox::cli::run()
}
