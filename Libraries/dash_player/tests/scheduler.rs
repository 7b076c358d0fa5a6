mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{vod_manifest, MockNetwork, Recorder, MANIFEST_URL};
use dash_player::mpd::builder::MpdBuilder;
use dash_player::mpd::AdaptationSets;
use dash_player::{
    parse_mpd, AbrController, BandwidthMeter, BufferManager, DashAbrController, DashError,
    PlayerConfig, Scheduler, SelectionMap,
};
use tokio::time::sleep;

struct Harness {
    scheduler: Scheduler,
    buffer: Arc<BufferManager>,
    recorder: Arc<Recorder>,
}

fn harness(config: &PlayerConfig, network: &MockNetwork) -> Harness {
    let buffer = Arc::new(BufferManager::new());
    let meter = Arc::new(BandwidthMeter::new(
        config.initial_bitrate,
        config.smoothing_factor,
        vec![],
    ));
    let recorder = Arc::new(Recorder::default());
    let abr = DashAbrController::new(config, meter.clone(), buffer.clone());
    let scheduler = Scheduler::new(
        config,
        network.downloader(vec![meter]),
        buffer.clone(),
        Box::new(abr),
        vec![recorder.clone()],
    );
    Harness { scheduler, buffer, recorder }
}

/// Picks the given representation ids in turn, repeating the last one.
struct ScriptedAbr {
    picks: Vec<&'static str>,
    calls: usize,
}

impl AbrController for ScriptedAbr {
    fn select_representations(&mut self, adaptation_sets: &AdaptationSets) -> SelectionMap {
        let pick = self.picks[self.calls.min(self.picks.len() - 1)];
        self.calls += 1;
        adaptation_sets
            .keys()
            .map(|id| (id.clone(), pick.to_string()))
            .collect()
    }
}

async fn wait_for_end(scheduler: &Scheduler) {
    for _ in 0..1000 {
        if scheduler.is_end() {
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("scheduler never reached the end of the stream");
}

#[tokio::test(start_paused = true)]
async fn downloads_every_index_then_ends() {
    let network = MockNetwork::new(Duration::from_millis(200));
    let h = harness(&PlayerConfig::default(), &network);
    let manifest = parse_mpd(&vod_manifest(3), MANIFEST_URL).unwrap();

    h.scheduler.start(manifest.adaptation_sets.clone());
    wait_for_end(&h.scheduler).await;
    // No notification once the stream is exhausted
    sleep(Duration::from_secs(1)).await;

    assert_eq!(h.recorder.started(), [0, 1, 2]);
    assert_eq!(h.recorder.completed(), [0, 1, 2]);
    assert_eq!(h.buffer.enqueued(), 3.0);
    assert_eq!(network.count_requests("init-stream0.m4s"), 1);
    assert_eq!(network.requests().len(), 4);
    assert!(h.scheduler.stop().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn stops_prefetching_above_max_buffer() {
    let network = MockNetwork::new(Duration::from_millis(100));
    let config = PlayerConfig {
        max_buffer_duration: 2.0,
        ..PlayerConfig::default()
    };
    let h = harness(&config, &network);
    let manifest = parse_mpd(&vod_manifest(10), MANIFEST_URL).unwrap();

    h.scheduler.start(manifest.adaptation_sets.clone());
    sleep(Duration::from_secs(30)).await;

    // Nobody plays: the loop halts once the level exceeds 2s
    assert_eq!(h.recorder.started(), [0, 1, 2]);
    assert!(!h.scheduler.is_end());

    h.buffer.update_position(2.0);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(h.recorder.started().len(), 5);
    assert!(h.scheduler.stop().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn fetches_one_segment_per_adaptation_set() {
    let network = MockNetwork::new(Duration::from_millis(100));
    let h = harness(&PlayerConfig::default(), &network);
    let xml = MpdBuilder::default()
        .timescale(1000)
        .timeline_entry(2000, 0)
        .timeline_entry(1500, 0)
        .video_set("video", &[("v", 400_000)])
        .audio_set("audio", &[("a", 64_000)])
        .build_xml_string()
        .unwrap();
    let manifest = parse_mpd(&xml, MANIFEST_URL).unwrap();

    h.scheduler.start(manifest.adaptation_sets.clone());
    wait_for_end(&h.scheduler).await;

    assert_eq!(network.count_requests("chunk-streamv-"), 2);
    assert_eq!(network.count_requests("chunk-streama-"), 2);
    assert_eq!(network.count_requests("init-stream"), 2);
    assert!((h.buffer.enqueued() - 3.5).abs() < 1e-9);
    h.scheduler.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn update_switches_manifest_without_restart() {
    let network = MockNetwork::new(Duration::from_millis(100));
    let h = harness(&PlayerConfig::default(), &network);
    let short = parse_mpd(&vod_manifest(2), MANIFEST_URL).unwrap();
    let long = parse_mpd(&vod_manifest(4), MANIFEST_URL).unwrap();

    h.scheduler.start(short.adaptation_sets.clone());
    h.scheduler.update(long.adaptation_sets.clone());
    wait_for_end(&h.scheduler).await;

    assert_eq!(h.recorder.completed(), [0, 1, 2, 3]);
    h.scheduler.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_download_ends_the_loop_with_the_error() {
    let network = MockNetwork::new(Duration::from_millis(100)).failing_on("chunk-stream0-00002");
    let h = harness(&PlayerConfig::default(), &network);
    let manifest = parse_mpd(&vod_manifest(5), MANIFEST_URL).unwrap();

    h.scheduler.start(manifest.adaptation_sets.clone());
    sleep(Duration::from_secs(5)).await;

    assert!(h.scheduler.has_failed());
    assert!(!h.scheduler.is_end());
    assert_eq!(h.recorder.completed(), [0]);
    assert!(matches!(h.scheduler.stop().await, Err(DashError::Transfer { .. })));
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_an_in_flight_download() {
    let network = MockNetwork::new(Duration::from_secs(600));
    let h = harness(&PlayerConfig::default(), &network);
    let manifest = parse_mpd(&vod_manifest(5), MANIFEST_URL).unwrap();

    h.scheduler.start(manifest.adaptation_sets.clone());
    sleep(Duration::from_secs(1)).await;

    let started = tokio::time::Instant::now();
    assert!(h.scheduler.stop().await.is_ok());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(h.recorder.completed().is_empty());
    assert!(!h.scheduler.has_failed());
}

#[tokio::test(start_paused = true)]
async fn switching_back_and_forth_fetches_each_init_once() {
    let network = MockNetwork::new(Duration::from_millis(100));
    let config = PlayerConfig::default();
    let buffer = Arc::new(BufferManager::new());
    let recorder = Arc::new(Recorder::default());
    let abr = ScriptedAbr {
        picks: vec!["lo", "hi", "hi", "lo", "hi"],
        calls: 0,
    };
    let scheduler = Scheduler::new(
        &config,
        network.downloader(vec![]),
        buffer.clone(),
        Box::new(abr),
        vec![recorder.clone()],
    );
    let xml = MpdBuilder::default()
        .timeline_entry(1, 4)
        .video_set("video", &[("lo", 200_000), ("hi", 2_000_000)])
        .build_xml_string()
        .unwrap();
    let manifest = parse_mpd(&xml, MANIFEST_URL).unwrap();

    scheduler.start(manifest.adaptation_sets.clone());
    wait_for_end(&scheduler).await;

    assert_eq!(recorder.completed(), [0, 1, 2, 3, 4]);
    assert_eq!(network.count_requests("init-streamlo.m4s"), 1);
    assert_eq!(network.count_requests("init-streamhi.m4s"), 1);
    assert_eq!(network.count_requests("chunk-streamlo-"), 2);
    assert_eq!(network.count_requests("chunk-streamhi-"), 3);
    scheduler.stop().await.unwrap();
}
