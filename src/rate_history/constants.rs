/// Rates kept per remote address; older ones are discarded first.
pub const MAX_RATES_PER_ADDRESS: usize = 5;

/// `version` written into the JSON history file.
pub const FORMAT_VERSION: u32 = 2;
