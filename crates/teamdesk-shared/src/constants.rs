/// Application name, also the platform data directory name.
pub const APP_NAME: &str = "teamdesk";

/// Domain used for placeholder emails of users whose auth record is unknown.
/// `.invalid` is reserved (RFC 2606) so these can never collide with a real
/// address.
pub const PLACEHOLDER_EMAIL_DOMAIN: &str = "users.teamdesk.invalid";

/// Number of characters of an id used as a last-resort display name.
pub const ID_FRAGMENT_LEN: usize = 8;

/// Display name used when a sender cannot be resolved.
pub const UNKNOWN_USER: &str = "Unknown User";

/// Default capacity of a single push subscription buffer.
pub const DEFAULT_PUSH_BUFFER: usize = 64;

/// Default number of times a coalesced fetch is re-issued while in flight.
pub const DEFAULT_MAX_FETCH_RERUNS: u32 = 3;

/// Preference key for the dark theme toggle.
pub const PREF_DARK_MODE: &str = "dark_mode";
