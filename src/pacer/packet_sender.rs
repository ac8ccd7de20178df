use std::{
    fmt, io,
    ops::{Deref, DerefMut},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    config::TransportSettings,
    events::{PacketSendResult, PacketsDropped, Signal},
    log::{LogThrottle, log_sink::LogSink},
    packet::SharedPacket,
    send_queue::RtpSendQueue,
    sink_debug, sink_info, sink_trace, sink_warn,
};

use super::{
    constants::{MAX_PACE_INTERVAL, PACE_INTERVAL, SEND_ERROR_LOG_PERIOD},
    interval_budget::IntervalBudget,
    media_session::MediaSession,
    packet_send_error::PacketSendError,
};

/// Pacing cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacerConfig {
    pub pace_interval: Duration,
    pub max_pace_interval: Duration,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            pace_interval: PACE_INTERVAL,
            max_pace_interval: MAX_PACE_INTERVAL,
        }
    }
}

impl From<&TransportSettings> for PacerConfig {
    fn from(settings: &TransportSettings) -> Self {
        Self {
            pace_interval: settings.pace_interval,
            max_pace_interval: settings.max_pace_interval,
        }
    }
}

/// Counters since the pacer started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacerStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
}

struct PacerState {
    queue: RtpSendQueue,
    budget: IntervalBudget,
    /// When the budget was last credited; the next top-up covers the time
    /// since then.
    last_top_up: Instant,
    /// Set after a cycle that sent nothing or ended on a send failure; the
    /// next sleep is a full interval instead of the rest of the current one.
    backoff: bool,
    stop: bool,
    stats: PacerStats,
    send_error_log: LogThrottle,
}

struct Shared {
    state: Mutex<PacerState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PacerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drains a send queue onto a media session at a metered bitrate.
///
/// Runs one `pacer` thread. Each cycle it sleeps out the rest of the pace
/// interval, blocks while the queue is empty, tops up its byte budget for the
/// elapsed time and sends while the budget is positive. A packet larger than
/// the balance still goes out whole; the overdraft is repaid by later top-ups
/// before the next send. Producers
/// enqueue through [`PacketSender::queue`]; the returned guard wakes the
/// thread when dropped.
///
/// Dropping the sender stops the thread and waits for it, so no packet is sent
/// after the drop returns.
pub struct PacketSender {
    shared: Arc<Shared>,
    session: Arc<dyn MediaSession>,
    packet_send: Signal<PacketSendResult>,
    thread: Option<JoinHandle<()>>,
    logger: Arc<dyn LogSink>,
}

impl PacketSender {
    pub fn new(
        session: Arc<dyn MediaSession>,
        pacing_bits_per_sec: usize,
        config: PacerConfig,
        logger: Arc<dyn LogSink>,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(PacerState {
                queue: RtpSendQueue::new(Arc::clone(&logger)),
                budget: IntervalBudget::new(pacing_bits_per_sec, config.max_pace_interval),
                last_top_up: Instant::now(),
                backoff: false,
                stop: false,
                stats: PacerStats::default(),
                send_error_log: LogThrottle::new(SEND_ERROR_LOG_PERIOD),
            }),
            wake: Condvar::new(),
        });
        let packet_send = Signal::new();

        let worker = PacerWorker {
            shared: Arc::clone(&shared),
            session: Arc::clone(&session),
            packet_send: packet_send.clone(),
            pace_interval: config.pace_interval,
            logger: Arc::clone(&logger),
        };
        let thread = thread::Builder::new()
            .name("pacer".into())
            .spawn(move || worker.run())?;

        sink_info!(
            logger,
            "[Pacer] started for ssrc {:#010x} at {} bps, interval {}ms, cap {}ms",
            session.ssrc(),
            pacing_bits_per_sec,
            config.pace_interval.as_millis(),
            config.max_pace_interval.as_millis()
        );

        Ok(Self {
            shared,
            session,
            packet_send,
            thread: Some(thread),
            logger,
        })
    }

    /// Locks the send queue. The pacer is woken when the guard is dropped, so
    /// push a whole frame under one guard.
    pub fn queue(&self) -> SendQueueGuard<'_> {
        SendQueueGuard {
            state: self.shared.lock(),
            wake: &self.shared.wake,
        }
    }

    /// New pacing rate; the budget picks it up at the next top-up.
    pub fn pacing_bit_rate_set(&self, bits_per_sec: usize) {
        let mut state = self.shared.lock();
        if state.budget.target_rate() != bits_per_sec {
            sink_debug!(
                self.logger,
                "[Pacer] pacing rate {} -> {} bps",
                state.budget.target_rate(),
                bits_per_sec
            );
            state.budget.target_rate_set(bits_per_sec);
        }
    }

    #[must_use]
    pub fn pacing_bit_rate(&self) -> usize {
        self.shared.lock().budget.target_rate()
    }

    #[must_use]
    pub fn stats(&self) -> PacerStats {
        self.shared.lock().stats
    }

    #[must_use]
    pub fn session(&self) -> &Arc<dyn MediaSession> {
        &self.session
    }

    /// One notification per attempted write, emitted outside the pacer lock.
    #[must_use]
    pub fn packet_send_signal(&self) -> &Signal<PacketSendResult> {
        &self.packet_send
    }

    /// Emitted while the queue is locked: subscribers must not call back into
    /// this sender.
    #[must_use]
    pub fn packets_dropped_signal(&self) -> Signal<PacketsDropped> {
        self.shared.lock().queue.packets_dropped_signal().clone()
    }

    /// Stops the thread and waits for it. Queued packets are discarded.
    pub fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        self.shared.lock().stop = true;
        self.shared.wake.notify_all();
        if handle.join().is_err() {
            sink_warn!(self.logger, "[Pacer] thread panicked");
        }
        sink_info!(self.logger, "[Pacer] stopped");
    }
}

impl Drop for PacketSender {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for PacketSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketSender")
            .field("ssrc", &self.session.ssrc())
            .field("running", &self.thread.is_some())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to the pacer's send queue; wakes the pacer on drop.
pub struct SendQueueGuard<'a> {
    state: MutexGuard<'a, PacerState>,
    wake: &'a Condvar,
}

impl Deref for SendQueueGuard<'_> {
    type Target = RtpSendQueue;

    fn deref(&self) -> &RtpSendQueue {
        &self.state.queue
    }
}

impl DerefMut for SendQueueGuard<'_> {
    fn deref_mut(&mut self) -> &mut RtpSendQueue {
        &mut self.state.queue
    }
}

impl Drop for SendQueueGuard<'_> {
    fn drop(&mut self) {
        if !self.state.queue.is_empty() {
            self.wake.notify_one();
        }
    }
}

struct PacerWorker {
    shared: Arc<Shared>,
    session: Arc<dyn MediaSession>,
    packet_send: Signal<PacketSendResult>,
    pace_interval: Duration,
    logger: Arc<dyn LogSink>,
}

impl PacerWorker {
    fn run(self) {
        sink_debug!(self.logger, "[Pacer] thread running");
        loop {
            // Pacing: sleep out the interval. Only a stop request cuts it short.
            let state = self.shared.lock();
            if state.stop {
                break;
            }
            let sleep_for = if state.backoff {
                self.pace_interval
            } else {
                self.pace_interval
                    .saturating_sub(state.last_top_up.elapsed())
            };
            let (state, _) = self
                .shared
                .wake
                .wait_timeout_while(state, sleep_for, |s| !s.stop)
                .unwrap_or_else(PoisonError::into_inner);

            let mut state = self
                .shared
                .wake
                .wait_while(state, |s| s.queue.is_empty() && !s.stop)
                .unwrap_or_else(PoisonError::into_inner);
            if state.stop {
                break;
            }

            // Draining.
            let now = Instant::now();
            let elapsed = now.saturating_duration_since(state.last_top_up);
            state.budget.top_up(elapsed);
            state.last_top_up = now;
            sink_trace!(
                self.logger,
                "[Pacer] budget {} bytes after {}us, {} queued",
                state.budget.remaining(),
                elapsed.as_micros(),
                state.queue.len()
            );
            let results = self.drain(&mut state);
            drop(state);

            for result in &results {
                self.packet_send.emit(result);
            }
        }
        sink_debug!(self.logger, "[Pacer] thread exiting");
    }

    fn drain(&self, state: &mut PacerState) -> Vec<PacketSendResult> {
        let ssrc = self.session.ssrc();
        let mut results = Vec::new();

        while state.budget.has_remaining() {
            let Some(item) = state.queue.pop() else {
                break;
            };
            let status = self.transmit(&item.packet);

            match &status {
                Ok(written) => {
                    state.budget.debit(item.packet.total_size());
                    state.stats.packets_sent += 1;
                    state.stats.bytes_sent += *written as u64;
                    sink_trace!(
                        self.logger,
                        "[Pacer] sent seq {} ({} bytes), {} left",
                        item.packet.params().sequence_number,
                        written,
                        state.budget.remaining()
                    );
                }
                Err(e) => {
                    state.stats.send_errors += 1;
                    if let Some(suppressed) = state.send_error_log.check() {
                        sink_warn!(
                            self.logger,
                            "[Pacer] send failed for ssrc {:#010x}: {} ({} similar suppressed)",
                            ssrc,
                            e,
                            suppressed
                        );
                    }
                }
            }

            let failed = status.is_err();
            results.push(PacketSendResult {
                ssrc,
                packet: item.packet,
                status,
            });
            if failed {
                break;
            }
        }
        state.backoff = results.last().is_none_or(|r| r.status.is_err());
        results
    }

    fn transmit(&self, packet: &SharedPacket) -> Result<usize, PacketSendError> {
        let transport = self
            .session
            .transport()
            .ok_or(PacketSendError::NoTransport)?;
        let remote = self
            .session
            .remote_address()
            .ok_or(PacketSendError::NoRemoteAddress)?;
        Ok(transport.send_to(packet.wire_bytes(), remote)?)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::{
        log::{MemoryLogSink, NoopLogSink, log_level::LogLevel},
        pacer::{RtpTransport, UdpMediaSession},
        packet::PacketPool,
    };
    use std::net::SocketAddr;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(Vec<u8>, Instant)>>,
    }

    impl RtpTransport for RecordingTransport {
        fn send_to(&self, buf: &[u8], _addr: SocketAddr) -> io::Result<usize> {
            self.sent
                .lock()
                .unwrap()
                .push((buf.to_vec(), Instant::now()));
            Ok(buf.len())
        }
    }

    fn remote() -> Option<SocketAddr> {
        Some("127.0.0.1:5004".parse().unwrap())
    }

    fn recording_session() -> (Arc<RecordingTransport>, Arc<dyn MediaSession>) {
        let transport = Arc::new(RecordingTransport::default());
        let dyn_transport: Arc<dyn RtpTransport> = transport.clone();
        let session = UdpMediaSession::with_transport(0xABCD, Some(dyn_transport), remote());
        (transport, Arc::new(session))
    }

    fn enqueue(sender: &PacketSender, pool: &PacketPool, count: u16, payload: usize) {
        let mut queue = sender.queue();
        let now = Instant::now();
        for seq in 0..count {
            let mut pkt = pool.acquire().unwrap();
            pkt.header_headroom_set(12);
            pkt.payload_size_set(payload);
            pkt.params_mut().sequence_number = seq;
            pkt.write_rtp_header();
            queue.push(pkt.share(), now);
        }
    }

    fn sequence(buf: &[u8]) -> u16 {
        u16::from_be_bytes([buf[2], buf[3]])
    }

    #[test]
    fn packets_go_out_in_order_with_a_result_each() {
        let (transport, session) = recording_session();
        let pool = PacketPool::create(32, 256, Arc::new(NoopLogSink));
        let sender =
            PacketSender::new(session, 8_000_000, PacerConfig::default(), Arc::new(NoopLogSink))
                .unwrap();
        let (_conn, results) = sender.packet_send_signal().channel();

        enqueue(&sender, &pool, 20, 100);
        for _ in 0..20 {
            let r = results.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(r.ssrc, 0xABCD);
            assert_eq!(r.status, Ok(112));
        }

        let sent = transport.sent.lock().unwrap();
        let order: Vec<u16> = sent.iter().map(|(buf, _)| sequence(buf)).collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
        assert_eq!(sender.stats().packets_sent, 20);
        assert_eq!(sender.stats().bytes_sent, 20 * 112);
    }

    #[test]
    fn sending_is_spread_over_time_at_the_target_rate() {
        let (transport, session) = recording_session();
        let pool = PacketPool::create(64, 1100, Arc::new(NoopLogSink));
        // 100_000 bytes/s; 40 packets of 1012 bytes need about 400ms.
        let sender =
            PacketSender::new(session, 800_000, PacerConfig::default(), Arc::new(NoopLogSink))
                .unwrap();
        let (_conn, results) = sender.packet_send_signal().channel();

        let start = Instant::now();
        enqueue(&sender, &pool, 40, 1000);
        for _ in 0..40 {
            results.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "drained in {elapsed:?}");

        // No 100ms window carries more than its share plus one max-interval burst
        // and one oversized packet.
        let sent = transport.sent.lock().unwrap();
        let limit = 10_000 + 5_000 + 1_012;
        for (i, (_, t0)) in sent.iter().enumerate() {
            let window: usize = sent[i..]
                .iter()
                .take_while(|(_, t)| t.duration_since(*t0) < Duration::from_millis(100))
                .map(|(buf, _)| buf.len())
                .sum();
            assert!(window <= limit, "{window} bytes in 100ms");
        }
    }

    #[test]
    fn packets_larger_than_one_interval_still_respect_the_rate() {
        let (transport, session) = recording_session();
        let pool = PacketPool::create(64, 1300, Arc::new(NoopLogSink));
        // 32_000 bytes/s, 320 bytes per 10ms interval; each packet is 1212 bytes.
        let sender =
            PacketSender::new(session, 256_000, PacerConfig::default(), Arc::new(NoopLogSink))
                .unwrap();
        let (_conn, results) = sender.packet_send_signal().channel();

        enqueue(&sender, &pool, 40, 1200);
        for _ in 0..40 {
            results.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        let sent = transport.sent.lock().unwrap();
        let first = sent[0].1;
        let last = sent[sent.len() - 1].1;
        // 48_480 bytes at 32_000 bytes/s take about 1.5s.
        assert!(
            last.duration_since(first) >= Duration::from_millis(1_200),
            "drained in {:?}",
            last.duration_since(first)
        );

        // Any 500ms window: its share, a carried balance and a straddling
        // top-up of at most one max-interval grant each, one packet.
        let limit = 16_000 + 2 * 1_600 + 1_212;
        for (i, (_, t0)) in sent.iter().enumerate() {
            let window: usize = sent[i..]
                .iter()
                .take_while(|(_, t)| t.duration_since(*t0) < Duration::from_millis(500))
                .map(|(buf, _)| buf.len())
                .sum();
            assert!(window <= limit, "{window} bytes in 500ms");
        }
    }

    #[test]
    fn missing_transport_fails_each_packet_and_logs_once() {
        let logger = Arc::new(MemoryLogSink::new());
        let session: Arc<dyn MediaSession> =
            Arc::new(UdpMediaSession::with_transport(9, None, remote()));
        let pool = PacketPool::create(16, 128, logger.clone());
        let sender =
            PacketSender::new(session, 8_000_000, PacerConfig::default(), logger.clone()).unwrap();
        let (_conn, results) = sender.packet_send_signal().channel();

        enqueue(&sender, &pool, 5, 10);
        for _ in 0..5 {
            let r = results.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(r.status, Err(PacketSendError::NoTransport));
        }

        assert_eq!(sender.stats().send_errors, 5);
        assert_eq!(sender.stats().packets_sent, 0);
        assert_eq!(logger.count_matching(LogLevel::Warn, "send failed"), 1);
        drop(results);
        drop(sender);
        assert_eq!(pool.available(), 16);
    }

    #[test]
    fn missing_remote_address_is_reported() {
        let (transport, session) = recording_session();
        session.remote_address_set(None);
        let pool = PacketPool::create(4, 64, Arc::new(NoopLogSink));
        let sender = PacketSender::new(
            Arc::clone(&session),
            8_000_000,
            PacerConfig::default(),
            Arc::new(NoopLogSink),
        )
        .unwrap();
        let (_conn, results) = sender.packet_send_signal().channel();

        enqueue(&sender, &pool, 1, 10);
        let r = results.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(r.status, Err(PacketSendError::NoRemoteAddress));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn subscribers_may_touch_the_queue_from_the_send_callback() {
        let (_transport, session) = recording_session();
        let sender = Arc::new(
            PacketSender::new(session, 8_000_000, PacerConfig::default(), Arc::new(NoopLogSink))
                .unwrap(),
        );
        let pool = PacketPool::create(4, 64, Arc::new(NoopLogSink));
        let (tx, rx) = std::sync::mpsc::channel();
        let weak = Arc::downgrade(&sender);
        let _conn = sender.packet_send_signal().connect(move |_| {
            let queued = weak.upgrade().map(|s| s.queue().len());
            if let Some(queued) = queued {
                let _ = tx.send(queued);
            }
        });

        enqueue(&sender, &pool, 1, 10);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 0);
    }

    #[test]
    fn idle_pacer_stops_promptly() {
        let (_transport, session) = recording_session();
        let sender =
            PacketSender::new(session, 1_000_000, PacerConfig::default(), Arc::new(NoopLogSink))
                .unwrap();
        thread::sleep(Duration::from_millis(30));

        let start = Instant::now();
        drop(sender);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn zero_rate_holds_packets_until_raised() {
        let (transport, session) = recording_session();
        let pool = PacketPool::create(4, 64, Arc::new(NoopLogSink));
        let sender =
            PacketSender::new(session, 0, PacerConfig::default(), Arc::new(NoopLogSink)).unwrap();
        let (_conn, results) = sender.packet_send_signal().channel();

        enqueue(&sender, &pool, 2, 10);
        thread::sleep(Duration::from_millis(50));
        assert!(transport.sent.lock().unwrap().is_empty());
        assert_eq!(sender.queue().len(), 2);

        sender.pacing_bit_rate_set(1_000_000);
        results.recv_timeout(Duration::from_secs(2)).unwrap();
        results.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn rate_changes_are_visible() {
        let (_transport, session) = recording_session();
        let sender =
            PacketSender::new(session, 1_000_000, PacerConfig::default(), Arc::new(NoopLogSink))
                .unwrap();
        sender.pacing_bit_rate_set(1_500_000);
        assert_eq!(sender.pacing_bit_rate(), 1_500_000);
    }
}
