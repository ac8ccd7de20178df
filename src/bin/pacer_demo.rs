//! Streams synthetic video frames over loopback UDP with both flow controllers
//! in the loop: the receiver side publishes a maximum rate from what it sees,
//! the sender side climbs toward it.
//!
//! Usage: `pacer_demo [CONFIG]` (defaults to `pacer_demo.conf`).

use std::{
    env,
    net::{SocketAddr, UdpSocket},
    process,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use byteorder::{BigEndian, ByteOrder};
use rand::Rng;
use rustypace::{
    config::{Config, ConfigError, TransportSettings},
    flow_control::PlaybackFlowControl,
    log::{
        log_sink::LogSink,
        logger::{DEFAULT_LOG_QUEUE_CAPACITY, Logger},
    },
    media_record::{RecordChannelParams, VideoRecordChannel},
    pacer::{MediaSession, UdpMediaSession},
    sink_info,
};

const DEMO_SECTION: &str = "Demo";
const RTP_CLOCK_RATE: u32 = 90_000;

struct DemoSettings {
    duration: Duration,
    frames_per_second: u32,
    keyframe_interval: u32,
    /// Fraction of datagrams the receiver pretends never arrived.
    simulated_loss: f64,
    absolute_max_rate: u32,
}

impl DemoSettings {
    fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            duration: Duration::from_secs(config.get_parsed(DEMO_SECTION, "duration_secs", 30)?),
            frames_per_second: config
                .get_parsed(DEMO_SECTION, "frames_per_second", 15_u32)?
                .max(1),
            keyframe_interval: config
                .get_parsed(DEMO_SECTION, "keyframe_interval", 150_u32)?
                .max(1),
            simulated_loss: config
                .get_parsed(DEMO_SECTION, "simulated_loss", 0.0_f64)?
                .clamp(0.0, 1.0),
            absolute_max_rate: config.get_parsed(DEMO_SECTION, "absolute_max_rate", 2_048_000)?,
        })
    }
}

/// One reporting interval as seen by the receiver.
struct ReceiverReport {
    duration_ms: u32,
    received: u32,
    lost: u32,
    average_size: u32,
}

#[derive(Default)]
struct ReceiveCounters {
    received: u32,
    lost: u32,
    bytes: u64,
    last_sequence: Option<u16>,
}

impl ReceiveCounters {
    fn sequence_seen(&mut self, sequence: u16) {
        if let Some(last) = self.last_sequence {
            let gap = sequence.wrapping_sub(last.wrapping_add(1));
            // Reordered or duplicated packets show up as huge gaps; skip them.
            if gap >= 0x8000 {
                return;
            }
            self.lost += u32::from(gap);
        }
        self.last_sequence = Some(sequence);
    }

    fn report(&mut self, duration: Duration) -> ReceiverReport {
        let average_size = if self.received == 0 {
            0
        } else {
            u32::try_from(self.bytes / u64::from(self.received)).unwrap_or(u32::MAX)
        };
        let report = ReceiverReport {
            duration_ms: u32::try_from(duration.as_millis()).unwrap_or(u32::MAX),
            received: self.received,
            lost: self.lost,
            average_size,
        };
        self.received = 0;
        self.lost = 0;
        self.bytes = 0;
        report
    }
}

fn receiver_run(
    socket: &UdpSocket,
    simulated_loss: f64,
    report_interval: Duration,
    reports: &Sender<ReceiverReport>,
    stop: &AtomicBool,
) {
    let mut rng = rand::thread_rng();
    let mut buf = [0_u8; 2048];
    let mut counters = ReceiveCounters::default();
    let mut interval_start = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        if let Ok((n, _)) = socket.recv_from(&mut buf) {
            if n >= 12 && !rng.gen_bool(simulated_loss) {
                counters.received += 1;
                counters.bytes += n as u64;
                counters.sequence_seen(BigEndian::read_u16(&buf[2..4]));
            }
        }

        let elapsed = interval_start.elapsed();
        if elapsed >= report_interval {
            if reports.send(counters.report(elapsed)).is_err() {
                return;
            }
            interval_start = Instant::now();
        }
    }
}

fn reports_apply(
    reports: &Receiver<ReceiverReport>,
    playback: &mut PlaybackFlowControl,
    channel: &mut VideoRecordChannel,
    published: &mut u32,
) {
    for report in reports.try_iter() {
        let max = playback.max_rate_calculate(
            report.duration_ms,
            report.received,
            report.lost,
            report.average_size,
            report.lost,
        );
        if max != *published {
            *published = max;
            channel.tmmbr_received(max);
        }
    }
}

fn main() -> std::io::Result<()> {
    let args: Vec<String> = env::args().collect();
    let config = match args.get(1) {
        Some(path) => Config::load(path),
        None => Config::load("pacer_demo.conf"),
    }
    .unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}. Using empty config.");
        Config::empty()
    });

    let (settings, demo) = match (
        TransportSettings::from_config(&config),
        DemoSettings::from_config(&config),
    ) {
        (Ok(settings), Ok(demo)) => (settings, demo),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Invalid configuration: {e}");
            process::exit(1);
        }
    };

    let logger = Logger::start(&config, DEFAULT_LOG_QUEUE_CAPACITY);
    eprintln!("[pacer_demo] logging to {}", logger.file_path().display());
    let sink: Arc<dyn LogSink> = Arc::new(logger.handle());

    let receiver = UdpSocket::bind("127.0.0.1:0")?;
    receiver.set_read_timeout(Some(Duration::from_millis(50)))?;
    let receiver_addr = receiver.local_addr()?;

    let stop = Arc::new(AtomicBool::new(false));
    let (report_tx, report_rx) = mpsc::channel();
    let receiver_thread = {
        let stop = Arc::clone(&stop);
        let interval = settings.flow_control_interval;
        let loss = demo.simulated_loss;
        thread::Builder::new()
            .name("demo-receiver".into())
            .spawn(move || receiver_run(&receiver, loss, interval, &report_tx, &stop))?
    };

    let local: SocketAddr = ([127, 0, 0, 1], 0).into();
    let session: Arc<dyn MediaSession> = Arc::new(UdpMediaSession::bind(
        rand::thread_rng().r#gen(),
        local,
        receiver_addr,
    )?);
    let params = RecordChannelParams {
        initial_max_rate: demo.absolute_max_rate,
        ..RecordChannelParams::default()
    };
    let mut channel = VideoRecordChannel::open(session, &settings, params, Arc::clone(&sink))?;
    let mut playback = PlaybackFlowControl::new(demo.absolute_max_rate, Arc::clone(&sink));
    let mut published = playback.max_rate_get();

    sink_info!(
        sink,
        "[pacer_demo] streaming {} fps for {}s to {}",
        demo.frames_per_second,
        demo.duration.as_secs(),
        receiver_addr
    );

    let frame_interval = Duration::from_secs(1) / demo.frames_per_second;
    let timestamp_step = RTP_CLOCK_RATE / demo.frames_per_second;
    let started = Instant::now();
    let mut next_frame = started;
    let mut next_tick = started + settings.flow_control_interval;
    let mut frame_index: u32 = 0;
    let mut rtp_timestamp: u32 = 0;

    while started.elapsed() < demo.duration {
        let now = Instant::now();
        if now >= next_frame {
            let frame_bytes =
                (channel.current_bit_rate() / 8 / demo.frames_per_second).max(1) as usize;
            let keyframe = frame_index % demo.keyframe_interval == 0
                || channel.keyframe_request_take();
            let frame = vec![0xA5_u8; frame_bytes];
            channel.frame_send(&frame, rtp_timestamp, keyframe);

            frame_index = frame_index.wrapping_add(1);
            rtp_timestamp = rtp_timestamp.wrapping_add(timestamp_step);
            next_frame += frame_interval;
        }

        if now >= next_tick {
            reports_apply(&report_rx, &mut playback, &mut channel, &mut published);
            channel.flow_control_tick();
            let stats = channel.pacer_stats();
            println!(
                "t={:>3}s  send {:>8} bps  published max {:>8} bps  ceiling {:>8} bps  sent {} pkts / {} errors  keyframe requests {}",
                started.elapsed().as_secs(),
                channel.current_bit_rate(),
                published,
                playback.bandwidth_limit(),
                stats.packets_sent,
                stats.send_errors,
                channel.keyframe_request_count()
            );
            next_tick += settings.flow_control_interval;
        }

        let wake = next_frame.min(next_tick);
        thread::sleep(wake.saturating_duration_since(Instant::now()));
    }

    stop.store(true, Ordering::Relaxed);
    let _ = receiver_thread.join();
    drop(channel);
    drop(playback);
    drop(sink);
    logger.shutdown();
    Ok(())
}
