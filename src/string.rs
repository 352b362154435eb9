use rand::Rng;
use rand::distr::Alphanumeric;

/// Random lower case suffix, always starting with a letter so it can be used in resource names.
pub fn unique_id() -> String {
    loop {
        let candidate: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(6)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();

        if candidate.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return candidate;
        }
    }
}
