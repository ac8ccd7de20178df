use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Instant,
};

use crate::{
    config::TransportSettings,
    events::{PacketSendResult, Signal, SignalConnection},
    flow_control::RecordFlowControl,
    log::log_sink::LogSink,
    pacer::{
        MediaSession, PacerConfig, PacerStats, PacketSender, constants::PACING_RATE_FACTOR,
    },
    packet::PacketPool,
    packetizer::{FramePacketizer, FrameSendOutcome},
    rate_history::RateHistoryManager,
    sink_info,
};

use super::record_channel_params::RecordChannelParams;

/// Pacing rate for an encoder target rate.
#[must_use]
pub fn pacing_rate_for(target_bit_rate: u32) -> usize {
    (f64::from(target_bit_rate) * PACING_RATE_FACTOR) as usize
}

#[derive(Default)]
struct KeyframeRequests {
    pending: AtomicBool,
    total: AtomicU64,
}

/// The sending half of a video call.
///
/// Frames go through the packetizer onto the pacer. A 1-second timer should
/// call [`VideoRecordChannel::flow_control_tick`]; whenever the send rate
/// changes the pacer is retuned to `rate * PACING_RATE_FACTOR`. A TMMBR from
/// the peer lands in [`VideoRecordChannel::tmmbr_received`]. Whenever the send
/// queue is flushed a keyframe is requested so the far end recovers quickly.
pub struct VideoRecordChannel {
    _packets_dropped: SignalConnection,
    sender: PacketSender,
    packetizer: FramePacketizer,
    flow_control: RecordFlowControl,
    target_bit_rate: u32,
    keyframe_requests: Arc<KeyframeRequests>,
    logger: Arc<dyn LogSink>,
}

impl VideoRecordChannel {
    pub fn open(
        session: Arc<dyn MediaSession>,
        settings: &TransportSettings,
        params: RecordChannelParams,
        logger: Arc<dyn LogSink>,
    ) -> io::Result<Self> {
        // Without a remote address there is nothing to key the history on.
        let remote_ip = session
            .remote_address()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();

        let history = RateHistoryManager::new(&settings.rate_history_path, Arc::clone(&logger));
        let mut flow_control = RecordFlowControl::new(
            remote_ip,
            params.initial_max_rate,
            history,
            Arc::clone(&logger),
        );
        if let Some(rate) = params.initial_send_rate {
            flow_control.initial_send_rate_set(rate);
        }
        let target_bit_rate = flow_control.send_rate_calculate();

        let pool = PacketPool::create(
            settings.packet_pool_size,
            settings.packet_capacity(),
            Arc::clone(&logger),
        );
        let packetizer = FramePacketizer::new(
            pool,
            settings,
            params.payload_type,
            session.ssrc(),
            Arc::clone(&logger),
        );
        let sender = PacketSender::new(
            Arc::clone(&session),
            pacing_rate_for(target_bit_rate),
            PacerConfig::from(settings),
            Arc::clone(&logger),
        )?;

        let keyframe_requests = Arc::new(KeyframeRequests::default());
        let requests = Arc::clone(&keyframe_requests);
        let packets_dropped = sender.packets_dropped_signal().connect(move |dropped| {
            if dropped.0 > 0 {
                requests.pending.store(true, Ordering::SeqCst);
                requests.total.fetch_add(1, Ordering::Relaxed);
            }
        });

        sink_info!(
            logger,
            "[VideoRecord] channel open to {:?}, starting at {} bps",
            session.remote_address(),
            target_bit_rate
        );

        Ok(Self {
            _packets_dropped: packets_dropped,
            sender,
            packetizer,
            flow_control,
            target_bit_rate,
            keyframe_requests,
            logger,
        })
    }

    pub fn frame_send(
        &mut self,
        frame: &[u8],
        rtp_timestamp: u32,
        is_keyframe: bool,
    ) -> FrameSendOutcome {
        self.frame_send_at(Instant::now(), frame, rtp_timestamp, is_keyframe)
    }

    pub fn frame_send_at(
        &mut self,
        now: Instant,
        frame: &[u8],
        rtp_timestamp: u32,
        is_keyframe: bool,
    ) -> FrameSendOutcome {
        self.packetizer
            .frame_send_at(now, &self.sender, frame, rtp_timestamp, is_keyframe)
    }

    pub fn flow_control_tick(&mut self) -> Option<u32> {
        self.flow_control_tick_at(Instant::now())
    }

    /// Recomputes the send rate. Returns the new rate when it changed.
    pub fn flow_control_tick_at(&mut self, now: Instant) -> Option<u32> {
        let rate = self.flow_control.send_rate_calculate_at(now);
        if rate == self.target_bit_rate {
            return None;
        }
        sink_info!(
            self.logger,
            "[VideoRecord] target rate {} -> {} bps",
            self.target_bit_rate,
            rate
        );
        self.target_bit_rate = rate;
        self.sender.pacing_bit_rate_set(pacing_rate_for(rate));
        Some(rate)
    }

    pub fn tmmbr_received(&mut self, max_rate: u32) -> Option<u32> {
        self.tmmbr_received_at(Instant::now(), max_rate)
    }

    /// Applies the peer's published maximum. A lower maximum takes effect
    /// immediately; a higher one is climbed toward on later ticks.
    pub fn tmmbr_received_at(&mut self, now: Instant, max_rate: u32) -> Option<u32> {
        sink_info!(self.logger, "[VideoRecord] TMMBR {} bps", max_rate);
        self.flow_control.max_rate_set_at(now, max_rate);
        self.flow_control_tick_at(now)
    }

    /// Bandwidth to leave for audio.
    pub fn reserve_bit_rate(&mut self, bits_per_sec: u32) {
        self.flow_control.reserved_bit_rate_set(bits_per_sec);
    }

    /// Rate the encoder should target.
    #[must_use]
    pub fn current_bit_rate(&self) -> u32 {
        self.target_bit_rate
    }

    /// True once after each send-queue flush; the encoder should then emit a
    /// keyframe.
    pub fn keyframe_request_take(&self) -> bool {
        self.keyframe_requests.pending.swap(false, Ordering::SeqCst)
    }

    #[must_use]
    pub fn keyframe_request_count(&self) -> u64 {
        self.keyframe_requests.total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn pacer_stats(&self) -> PacerStats {
        self.sender.stats()
    }

    #[must_use]
    pub fn pacing_bit_rate(&self) -> usize {
        self.sender.pacing_bit_rate()
    }

    #[must_use]
    pub fn packet_send_signal(&self) -> &Signal<PacketSendResult> {
        self.sender.packet_send_signal()
    }

    #[must_use]
    pub fn flow_control(&self) -> &RecordFlowControl {
        &self.flow_control
    }
}
