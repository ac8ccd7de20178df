/// One feedback interval as seen by the receiver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceiveStats {
    pub duration_ms: u32,
    pub packets_received: u32,
    pub packets_lost: u32,
    /// Bytes.
    pub packet_size_avg: u32,
    /// Bits per second, derived from the fields above.
    pub observed_rate: u32,
    /// Loss before repair and retransmission.
    pub actual_packet_loss: u32,
}

impl ReceiveStats {
    #[must_use]
    pub fn new(
        duration_ms: u32,
        packets_received: u32,
        packets_lost: u32,
        packet_size_avg: u32,
        actual_packet_loss: u32,
    ) -> Self {
        let observed_rate = if duration_ms == 0 {
            0
        } else {
            let bits = f64::from(packets_received) * f64::from(packet_size_avg) * 8.0;
            (bits / (f64::from(duration_ms) / 1_000.0)) as u32
        };
        Self {
            duration_ms,
            packets_received,
            packets_lost,
            packet_size_avg,
            observed_rate,
            actual_packet_loss,
        }
    }

    #[must_use]
    pub fn total_packets(&self) -> u64 {
        u64::from(self.packets_received) + u64::from(self.packets_lost)
    }

    /// Fraction of packets lost after repair.
    #[must_use]
    pub fn loss_ratio(&self) -> f64 {
        self.ratio_of(self.packets_lost)
    }

    /// Fraction of packets lost before repair.
    #[must_use]
    pub fn actual_loss_ratio(&self) -> f64 {
        self.ratio_of(self.actual_packet_loss)
    }

    fn ratio_of(&self, count: u32) -> f64 {
        match self.total_packets() {
            0 => 0.0,
            total => f64::from(count) / total as f64,
        }
    }
}
