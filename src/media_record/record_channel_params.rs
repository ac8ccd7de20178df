/// Per-call parameters of a [`super::VideoRecordChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordChannelParams {
    pub payload_type: u8,
    /// Maximum rate the peer allows before its first TMMBR, bits per second.
    pub initial_max_rate: u32,
    /// Starting rate that overrides the rate history, for endpoints known to
    /// sit on fast links.
    pub initial_send_rate: Option<u32>,
}

impl Default for RecordChannelParams {
    fn default() -> Self {
        Self {
            payload_type: 96,
            initial_max_rate: 2_048_000,
            initial_send_rate: None,
        }
    }
}
