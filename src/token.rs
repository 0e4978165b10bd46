use rand::{distributions::Alphanumeric, Rng};

const TOKEN_LEN: usize = 32;

/// Makes a fresh writer token, prefixed with `app_id` when one is set.
pub(crate) fn writer_token(app_id: &str) -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect();
    if app_id.is_empty() {
        token
    } else {
        format!("{}_{}", app_id, token)
    }
}
