mod token;

pub use token::Token;

/// The only place the API credential is read from.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Read the credential from the environment, ignoring blank values.
pub fn token_from_env() -> Option<Token> {
    std::env::var(TOKEN_ENV)
        .ok()
        .map(|value| Token::from(value.trim()))
        .filter(|token| !token.is_empty())
}
