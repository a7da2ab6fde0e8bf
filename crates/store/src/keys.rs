use pk_domain::AppKey;

pub const LATEST_IDENTITY_KEY: &[u8] = b"meta\0latest_identity";

const LOG: &[u8] = b"log\0";
const BAD: &[u8] = b"bad\0";

fn scoped(prefix: &[u8], app: &AppKey) -> Vec<u8> {
    let app = app.to_string();
    let mut key = Vec::with_capacity(prefix.len() + app.len() + 1 + 8);
    key.extend_from_slice(prefix);
    key.extend_from_slice(app.as_bytes());
    key.push(0);
    key
}

pub fn log_key(app: &AppKey, generation: u32, seq: u32) -> Vec<u8> {
    let mut key = scoped(LOG, app);
    key.extend_from_slice(&generation.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Generation embedded in a log key.
pub fn log_key_generation(key: &[u8]) -> Option<u32> {
    let at = key.len().checked_sub(8)?;
    let raw: [u8; 4] = key.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(raw))
}

/// Sequence number embedded in the last four bytes of a log key.
pub fn log_key_seq(key: &[u8]) -> Option<u32> {
    let tail: [u8; 4] = key.get(key.len().checked_sub(4)?..)?.try_into().ok()?;
    Some(u32::from_be_bytes(tail))
}

pub fn bad_token_key(app: &AppKey, token: &str) -> Vec<u8> {
    let mut key = scoped(BAD, app);
    key.extend_from_slice(token.as_bytes());
    key
}

/// Inclusive bounds covering every bad-token key. App keys and tokens are
/// UTF-8, which never contains 0xff.
pub fn bad_token_bounds() -> (Vec<u8>, Vec<u8>) {
    let mut upper = BAD.to_vec();
    upper.push(0xff);
    (BAD.to_vec(), upper)
}

pub fn parse_bad_token_key(key: &[u8]) -> Option<(AppKey, String)> {
    let rest = key.strip_prefix(BAD)?;
    let split = rest.iter().position(|b| *b == 0)?;
    let app = std::str::from_utf8(&rest[..split]).ok()?.parse().ok()?;
    let token = std::str::from_utf8(&rest[split + 1..]).ok()?.to_owned();
    Some((app, token))
}
