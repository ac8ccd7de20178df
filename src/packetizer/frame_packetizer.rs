use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    config::TransportSettings,
    log::log_sink::LogSink,
    packet::{PacketPool, RtpParams},
    pacer::PacketSender,
    sink_trace, sink_warn,
};

use super::frame_send_outcome::FrameSendOutcome;

/// Splits encoded frames into RTP packets and queues them for pacing.
///
/// Payload is cut into chunks of at most `max_payload` bytes. Every packet of
/// a frame shares the RTP timestamp and keyframe flag; sequence numbers run on
/// across frames and the marker is set on the last packet of each frame.
pub struct FramePacketizer {
    pool: PacketPool,
    payload_type: u8,
    ssrc: u32,
    max_payload: usize,
    headroom: usize,
    stale_queue_age: Duration,
    next_sequence: u16,
    logger: Arc<dyn LogSink>,
}

impl FramePacketizer {
    /// Starts at a random sequence number.
    pub fn new(
        pool: PacketPool,
        settings: &TransportSettings,
        payload_type: u8,
        ssrc: u32,
        logger: Arc<dyn LogSink>,
    ) -> Self {
        let headroom = settings.packet_headroom;
        let max_payload = settings
            .max_packet_payload
            .min(pool.buffer_capacity().saturating_sub(headroom))
            .max(1);
        debug_assert!(
            headroom + max_payload <= pool.buffer_capacity(),
            "pool buffers of {} bytes cannot hold {} bytes headroom plus payload",
            pool.buffer_capacity(),
            headroom
        );
        Self {
            pool,
            payload_type,
            ssrc,
            max_payload,
            headroom,
            stale_queue_age: settings.stale_queue_age,
            next_sequence: rand::random(),
            logger,
        }
    }

    #[must_use]
    pub fn with_initial_sequence(mut self, sequence: u16) -> Self {
        self.next_sequence = sequence;
        self
    }

    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    #[must_use]
    pub fn next_sequence(&self) -> u16 {
        self.next_sequence
    }

    #[must_use]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn frame_send(
        &mut self,
        sender: &PacketSender,
        frame: &[u8],
        rtp_timestamp: u32,
        is_keyframe: bool,
    ) -> FrameSendOutcome {
        self.frame_send_at(Instant::now(), sender, frame, rtp_timestamp, is_keyframe)
    }

    /// Queues `frame` on `sender`.
    ///
    /// If the head of the queue has waited longer than the stale-queue age the
    /// whole backlog is dropped first (subscribers of packets-dropped usually
    /// ask the encoder for a keyframe). If the pool runs dry mid-frame the rest
    /// of the frame is skipped; what was queued still goes out.
    pub fn frame_send_at(
        &mut self,
        now: Instant,
        sender: &PacketSender,
        frame: &[u8],
        rtp_timestamp: u32,
        is_keyframe: bool,
    ) -> FrameSendOutcome {
        let mut outcome = FrameSendOutcome::default();
        if frame.is_empty() {
            return outcome;
        }

        let chunk_count = frame.len().div_ceil(self.max_payload);
        let mut queue = sender.queue();
        outcome.packets_purged = queue.purge_stale(now, self.stale_queue_age);

        for (index, chunk) in frame.chunks(self.max_payload).enumerate() {
            let Some(mut packet) = self.pool.acquire() else {
                outcome.packets_skipped = chunk_count - index;
                sink_warn!(
                    self.logger,
                    "[Packetizer] packet pool exhausted, discarding {} of {} packets",
                    outcome.packets_skipped,
                    chunk_count
                );
                break;
            };

            packet.header_headroom_set(self.headroom);
            packet.payload_write(chunk);
            *packet.params_mut() = RtpParams {
                payload_type: self.payload_type,
                marker: index + 1 == chunk_count,
                sequence_number: self.next_sequence,
                timestamp: rtp_timestamp,
                ssrc: self.ssrc,
            };
            packet.write_rtp_header();
            packet.is_keyframe_set(is_keyframe);
            self.next_sequence = self.next_sequence.wrapping_add(1);

            outcome.packets_queued += 1;
            outcome.bytes_queued += packet.total_size();
            queue.push(packet.share(), now);
        }

        sink_trace!(
            self.logger,
            "[Packetizer] ts {} queued {} packets, {} bytes",
            rtp_timestamp,
            outcome.packets_queued,
            outcome.bytes_queued
        );
        queue.media_frame_created_emit(outcome.bytes_queued);
        outcome
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::{
        events::MediaFrameCreated,
        log::NoopLogSink,
        pacer::{MediaSession, PacerConfig, UdpMediaSession},
    };

    fn settings(max_payload: usize) -> TransportSettings {
        TransportSettings {
            max_packet_payload: max_payload,
            packet_headroom: 80,
            ..TransportSettings::default()
        }
    }

    /// A pacer at rate 0 never drains, so the queue can be inspected.
    fn parked_sender() -> PacketSender {
        let session: Arc<dyn MediaSession> =
            Arc::new(UdpMediaSession::with_transport(0x55, None, None));
        PacketSender::new(session, 0, PacerConfig::default(), Arc::new(NoopLogSink)).unwrap()
    }

    fn packetizer(pool_size: usize, max_payload: usize) -> (PacketPool, FramePacketizer) {
        let s = settings(max_payload);
        let pool = PacketPool::create(pool_size, s.packet_capacity(), Arc::new(NoopLogSink));
        let p = FramePacketizer::new(pool.clone(), &s, 96, 0x55, Arc::new(NoopLogSink))
            .with_initial_sequence(65_534);
        (pool, p)
    }

    #[test]
    fn frame_is_split_with_marker_on_last_and_wrapping_sequence() {
        let (_pool, mut p) = packetizer(16, 100);
        let sender = parked_sender();
        let frame: Vec<u8> = (0..250_u16).map(|i| i as u8).collect();

        let outcome = p.frame_send(&sender, &frame, 9_000, true);
        assert_eq!(outcome.packets_queued, 3);
        assert_eq!(outcome.bytes_queued, 250 + 3 * 12);
        assert!(outcome.is_complete());

        let mut queue = sender.queue();
        let packets: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|i| i.packet).collect();
        let seqs: Vec<u16> = packets.iter().map(|p| p.params().sequence_number).collect();
        assert_eq!(seqs, vec![65_534, 65_535, 0]);
        let markers: Vec<bool> = packets.iter().map(|p| p.params().marker).collect();
        assert_eq!(markers, vec![false, false, true]);
        assert!(packets.iter().all(|p| p.is_keyframe() && p.params().timestamp == 9_000));
        assert_eq!(packets[2].payload().len(), 50);
        assert_eq!(packets[0].headroom(), 80);

        let rebuilt: Vec<u8> = packets.iter().flat_map(|p| p.payload().to_vec()).collect();
        assert_eq!(rebuilt, frame);
        assert_eq!(p.next_sequence(), 1);
    }

    #[test]
    fn exhausted_pool_skips_the_rest_of_the_frame() {
        let (pool, mut p) = packetizer(2, 10);
        let sender = parked_sender();

        let outcome = p.frame_send(&sender, &[1; 45], 1, false);
        assert_eq!(outcome.packets_queued, 2);
        assert_eq!(outcome.packets_skipped, 3);
        assert!(!outcome.is_complete());
        assert_eq!(sender.queue().len(), 2);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn stale_backlog_is_dropped_before_the_next_frame() {
        let (_pool, mut p) = packetizer(16, 100);
        let sender = parked_sender();
        let (_conn, dropped) = sender.packets_dropped_signal().channel();
        let t0 = Instant::now();

        p.frame_send_at(t0, &sender, &[0; 150], 1, true);
        let fresh = p.frame_send_at(t0 + Duration::from_millis(400), &sender, &[0; 50], 2, false);
        assert_eq!(fresh.packets_purged, 0);

        let late = p.frame_send_at(t0 + Duration::from_millis(600), &sender, &[0; 50], 3, false);
        assert_eq!(late.packets_purged, 3);
        assert_eq!(dropped.try_recv().unwrap().0, 3);
        assert_eq!(sender.queue().len(), 1);
    }

    #[test]
    fn frame_size_is_announced() {
        let (_pool, mut p) = packetizer(16, 100);
        let sender = parked_sender();
        let (_conn, frames) = sender.queue().media_frame_created_signal().channel();

        p.frame_send(&sender, &[0; 120], 7, false);
        assert_eq!(frames.try_recv().unwrap(), MediaFrameCreated(120 + 2 * 12));
        assert_eq!(p.frame_send(&sender, &[], 8, false), FrameSendOutcome::default());
        assert!(frames.try_recv().is_err());
    }
}
