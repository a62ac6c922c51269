use async_trait::async_trait;
use audio_io::{AudioContext, ContextState, MemoryLoader, OfflineContextFactory, PcmBuffer};
use aura::app::{Collaborators, Engine, EngineCommand, EngineHandle, EngineSnapshot};
use aura::audio::{BinauralPreset, ChannelStatus, SleepPreset};
use aura::catalog::{InMemoryCatalog, InteractionLogger, LoggingInteractionSink};
use aura::ui::ControlAction;
use aura_core::{EngineEvent, Error, InteractionEvent, MixCommand, MixEntry, Track, TrackId};
use mockall::mock;
use mockall::predicate::eq;
use settings_manager::EngineSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const RATE: u32 = 1000;

mock! {
    Interactions {}
    #[async_trait]
    impl InteractionLogger for Interactions {
        async fn log(&self, event: InteractionEvent) -> Result<(), Error>;
    }
}

struct Harness {
    handle: EngineHandle,
    events: mpsc::Receiver<EngineEvent>,
    media: AudioContext,
    binaural_contexts: Arc<OfflineContextFactory>,
    task: JoinHandle<Result<(), Error>>,
}

impl Harness {
    fn start() -> Self {
        Self::start_with(EngineSettings::default(), Arc::new(LoggingInteractionSink))
    }

    fn start_with(mut settings: EngineSettings, interactions: Arc<dyn InteractionLogger>) -> Self {
        if settings.mixer.command_stagger_ms == 100 {
            settings.mixer.command_stagger_ms = 20;
        }

        let media = AudioContext::offline("media", RATE);
        let binaural_contexts = Arc::new(OfflineContextFactory::new(RATE));
        let collaborators = Collaborators {
            catalog: Arc::new(catalog()),
            interactions,
            media: Arc::new(loader()),
            binaural_contexts: binaural_contexts.clone(),
        };

        let (mut engine, handle, events) =
            Engine::new(settings, media.clone(), collaborators).unwrap();
        let task = tokio::spawn(async move { engine.run().await });

        Self {
            handle,
            events,
            media,
            binaural_contexts,
            task,
        }
    }

    async fn send(&self, command: EngineCommand) {
        self.handle.send(command).await.unwrap();
    }

    async fn snapshot(&self) -> EngineSnapshot {
        self.handle.snapshot().await.unwrap()
    }

    /// Poll until `check` holds
    async fn wait_for<F>(&self, check: F) -> EngineSnapshot
    where
        F: Fn(&EngineSnapshot) -> bool,
    {
        for _ in 0..200 {
            let snapshot = self.snapshot().await;
            if check(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("engine never reached the expected state: {:?}", self.snapshot().await);
    }

    async fn next_event<F>(&mut self, matches: F) -> EngineEvent
    where
        F: Fn(&EngineEvent) -> bool,
    {
        while let Some(event) = self.events.recv().await {
            if matches(&event) {
                return event;
            }
        }
        panic!("event stream closed");
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    async fn stop(self) {
        self.handle.shutdown().await.unwrap();
        self.task.await.unwrap().unwrap();
    }
}

fn track(id: &str) -> Track {
    Track::new(id, id.to_uppercase()).with_locator(format!("{}.f32", id))
}

fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::from_tracks(vec![
        track("rain"),
        track("fire"),
        track("wind"),
        track("ocean"),
        track("birds"),
        Track::new("hum", "Hum"),
        track("chime"),
    ])
}

fn loader() -> MemoryLoader {
    let loader = MemoryLoader::new();
    for id in ["rain", "fire", "wind", "ocean", "birds"] {
        loader.insert(format!("{}.f32", id), PcmBuffer::sine(50.0, 2.0, RATE, 0.3));
    }
    loader.insert("chime.f32", PcmBuffer::sine(100.0, 0.1, RATE, 0.3));
    loader
}

fn ids(snapshot: &EngineSnapshot) -> Vec<String> {
    snapshot.channel_ids()
}

#[test_log::test(tokio::test)]
async fn adding_the_same_layer_twice_keeps_one_channel() {
    let harness = Harness::start();
    harness.send(EngineCommand::AddSound(track("rain"))).await;
    harness.send(EngineCommand::AddSound(track("rain"))).await;

    let snapshot = harness
        .wait_for(|s| s.channel("rain").map(|c| c.status == ChannelStatus::Playing).unwrap_or(false))
        .await;
    assert_eq!(ids(&snapshot), vec!["rain"]);
    assert_eq!(snapshot.channel("rain").unwrap().volume, 0.7);

    harness.stop().await;
}

#[tokio::test]
async fn rain_layer_lifecycle() {
    let harness = Harness::start();
    let rain = TrackId::new("rain");

    harness.send(EngineCommand::AddSound(track("rain"))).await;
    assert_eq!(harness.snapshot().await.channel("rain").unwrap().volume, 0.7);

    harness
        .send(EngineCommand::UpdateVolume { id: rain.clone(), volume: 0.3 })
        .await;
    assert_eq!(harness.snapshot().await.channel("rain").unwrap().volume, 0.3);

    harness
        .send(EngineCommand::UpdateVolume { id: rain.clone(), volume: 1.5 })
        .await;
    assert_eq!(harness.snapshot().await.channel("rain").unwrap().volume, 1.0);

    harness.send(EngineCommand::RemoveSound(rain)).await;
    assert!(harness.snapshot().await.channels.is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn mix_command_replaces_existing_layers() {
    let mut harness = Harness::start();
    harness.send(EngineCommand::AddSound(track("fire"))).await;

    let command = MixCommand::new(vec![MixEntry::new("rain", 0.8), MixEntry::new("wind", 0.3)])
        .with_mood("calm");
    harness.send(EngineCommand::ApplyMix(command)).await;

    let applied = harness
        .next_event(|e| matches!(e, EngineEvent::MixApplied { .. }))
        .await;
    match applied {
        EngineEvent::MixApplied { channels, skipped, mood } => {
            assert_eq!(channels, vec![TrackId::new("rain"), TrackId::new("wind")]);
            assert!(skipped.is_empty());
            assert_eq!(mood.as_deref(), Some("calm"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    let snapshot = harness
        .wait_for(|s| s.channel("rain").map(|c| c.volume == 0.8).unwrap_or(false))
        .await;
    assert_eq!(ids(&snapshot), vec!["rain", "wind"]);
    assert_eq!(snapshot.channel("wind").unwrap().volume, 0.3);
    assert_eq!(snapshot.mood.as_deref(), Some("calm"));
    assert!(snapshot.mixer_open);

    harness.stop().await;
}

#[tokio::test]
async fn unresolved_mix_leaves_an_empty_mixer() {
    let mut harness = Harness::start();
    harness.send(EngineCommand::AddSound(track("fire"))).await;
    harness
        .send(EngineCommand::ApplyMixJson(r#"{"mix":[{"id":"x","volume":0.8}]}"#.to_string()))
        .await;

    let event = harness
        .next_event(|e| {
            matches!(e, EngineEvent::MixApplied { .. } | EngineEvent::MixRejected { .. })
        })
        .await;
    assert_eq!(
        event,
        EngineEvent::MixApplied {
            channels: Vec::new(),
            skipped: vec![TrackId::new("x")],
            mood: None,
        }
    );
    assert!(harness.snapshot().await.channels.is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn malformed_mix_keeps_current_layers() {
    let mut harness = Harness::start();
    harness.send(EngineCommand::AddSound(track("fire"))).await;
    harness
        .send(EngineCommand::ApplyMixJson(r#"{"mix": "rain"}"#.to_string()))
        .await;

    let event = harness
        .next_event(|e| matches!(e, EngineEvent::MixRejected { .. }))
        .await;
    assert!(matches!(event, EngineEvent::MixRejected { .. }));
    assert_eq!(ids(&harness.snapshot().await), vec!["fire"]);

    harness.stop().await;
}

#[tokio::test]
async fn stop_mix_clears_layers_and_mood() {
    let mut harness = Harness::start();
    let command = MixCommand::new(vec![MixEntry::new("rain", 0.5)]).with_mood("sleepy");
    harness.send(EngineCommand::ApplyMix(command)).await;
    harness
        .next_event(|e| matches!(e, EngineEvent::MixApplied { .. }))
        .await;

    harness.send(EngineCommand::StopMix).await;
    let snapshot = harness.snapshot().await;
    assert!(snapshot.channels.is_empty());
    assert!(snapshot.mood.is_none());

    // The staggered fade for the cleared mix must not resurrect anything.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(harness.snapshot().await.channels.is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn newer_mix_wins_over_older_staggered_volumes() {
    let mut settings = EngineSettings::default();
    settings.mixer.command_stagger_ms = 40;
    let mut harness = Harness::start_with(settings, Arc::new(LoggingInteractionSink));

    harness
        .send(EngineCommand::ApplyMix(MixCommand::new(vec![MixEntry::new("rain", 0.9)])))
        .await;
    harness
        .next_event(|e| matches!(e, EngineEvent::MixApplied { .. }))
        .await;
    harness
        .send(EngineCommand::ApplyMix(MixCommand::new(vec![MixEntry::new("rain", 0.2)])))
        .await;
    harness
        .next_event(|e| matches!(e, EngineEvent::MixApplied { .. }))
        .await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(harness.snapshot().await.channel("rain").unwrap().volume, 0.2);

    harness.stop().await;
}

#[tokio::test]
async fn staggered_volumes_leave_touched_layers_alone() {
    let mut settings = EngineSettings::default();
    settings.mixer.command_stagger_ms = 200;
    let mut harness = Harness::start_with(settings, Arc::new(LoggingInteractionSink));

    let command = MixCommand::new(vec![
        MixEntry::new("rain", 0.8),
        MixEntry::new("fire", 0.8),
        MixEntry::new("wind", 0.8),
    ]);
    harness.send(EngineCommand::ApplyMix(command)).await;
    harness
        .next_event(|e| matches!(e, EngineEvent::MixApplied { .. }))
        .await;

    harness
        .send(EngineCommand::UpdateVolume {
            id: TrackId::new("rain"),
            volume: 0.1,
        })
        .await;
    harness.send(EngineCommand::RemoveSound(TrackId::new("fire"))).await;
    harness.send(EngineCommand::AddSound(track("fire"))).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    let snapshot = harness.snapshot().await;
    assert_eq!(snapshot.channel("rain").unwrap().volume, 0.1);
    assert_eq!(snapshot.channel("fire").unwrap().volume, 0.7);
    assert_eq!(snapshot.channel("wind").unwrap().volume, 0.8);

    harness.stop().await;
}

#[tokio::test]
async fn blend_during_stagger_is_not_overwritten() {
    let mut settings = EngineSettings::default();
    settings.mixer.command_stagger_ms = 200;
    let mut harness = Harness::start_with(settings, Arc::new(LoggingInteractionSink));

    let command = MixCommand::new(vec![MixEntry::new("rain", 0.9), MixEntry::new("fire", 0.9)]);
    harness.send(EngineCommand::ApplyMix(command)).await;
    harness
        .next_event(|e| matches!(e, EngineEvent::MixApplied { .. }))
        .await;

    harness.send(EngineCommand::BlendPress { x: 0.0, y: 0.0 }).await;
    harness.send(EngineCommand::BlendRelease).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    let snapshot = harness.snapshot().await;
    assert_eq!(snapshot.channel("rain").unwrap().volume, 1.0);
    assert_eq!(snapshot.channel("fire").unwrap().volume, 0.0);

    harness.stop().await;
}

#[tokio::test]
async fn pause_focus_mix_pauses_the_featured_track() {
    let mut harness = Harness::start();
    harness.send(EngineCommand::FeatureTrack(track("ocean"))).await;
    harness
        .next_event(|e| matches!(e, EngineEvent::PlaybackStarted { .. }))
        .await;

    let command = MixCommand::ranked(["rain", "fire", "birds"], "happy");
    harness.send(EngineCommand::ApplyMix(command)).await;
    harness
        .next_event(|e| matches!(e, EngineEvent::MixApplied { .. }))
        .await;

    let snapshot = harness
        .wait_for(|s| s.channel("fire").map(|c| c.volume == 0.4).unwrap_or(false))
        .await;
    assert!(!snapshot.playback.is_playing);
    assert_eq!(snapshot.channel("rain").unwrap().volume, 0.8);
    assert_eq!(snapshot.mood.as_deref(), Some("happy"));

    harness.stop().await;
}

#[tokio::test]
async fn blending_two_layers_uses_top_row_weights() {
    let harness = Harness::start();
    harness.send(EngineCommand::AddSound(track("rain"))).await;
    harness.send(EngineCommand::AddSound(track("fire"))).await;

    harness.send(EngineCommand::BlendPress { x: 0.2, y: 0.4 }).await;
    harness.send(EngineCommand::BlendRelease).await;
    harness.send(EngineCommand::BlendMove { x: 0.9, y: 0.9 }).await;

    let snapshot = harness.snapshot().await;
    let rain = snapshot.channel("rain").unwrap().volume;
    let fire = snapshot.channel("fire").unwrap().volume;
    assert!((rain - 0.8 * 0.6).abs() < 1e-6, "rain at {}", rain);
    assert!((fire - 0.2 * 0.6).abs() < 1e-6, "fire at {}", fire);
    assert_eq!(snapshot.blend.x, 0.2);

    harness.stop().await;
}

#[tokio::test]
async fn featuring_a_track_logs_one_interaction() {
    let mut interactions = MockInteractions::new();
    interactions
        .expect_log()
        .with(eq(InteractionEvent::play(TrackId::new("ocean"))))
        .times(1)
        .returning(|_| Ok(()));

    let mut harness = Harness::start_with(EngineSettings::default(), Arc::new(interactions));
    harness.send(EngineCommand::FeatureTrackById(TrackId::new("ocean"))).await;
    harness
        .next_event(|e| matches!(e, EngineEvent::PlaybackStarted { .. }))
        .await;

    // Volume changes and mute are not transitions into playback.
    harness.send(EngineCommand::SetVolume(0.9)).await;
    harness.send(EngineCommand::Control(ControlAction::ToggleMute)).await;

    let snapshot = harness.snapshot().await;
    assert!(snapshot.playback.is_playing);
    assert!(snapshot.playback.is_muted);
    assert_eq!(snapshot.playback.current_track.unwrap().id, TrackId::new("ocean"));

    harness.stop().await;
}

#[tokio::test]
async fn failing_interaction_log_never_blocks_playback() {
    let mut interactions = MockInteractions::new();
    interactions
        .expect_log()
        .returning(|_| Err(Error::Other(anyhow::anyhow!("analytics down"))));

    let mut harness = Harness::start_with(EngineSettings::default(), Arc::new(interactions));
    harness.send(EngineCommand::FeatureTrack(track("rain"))).await;
    harness
        .next_event(|e| matches!(e, EngineEvent::PlaybackStarted { .. }))
        .await;
    assert!(harness.snapshot().await.playback.is_playing);

    harness.stop().await;
}

#[tokio::test]
async fn missing_media_stops_transport_and_reports() {
    let mut harness = Harness::start();
    harness
        .send(EngineCommand::FeatureTrack(Track::new("lost", "Lost").with_locator("lost.f32")))
        .await;

    let event = harness
        .next_event(|e| matches!(e, EngineEvent::PlaybackFailed { .. }))
        .await;
    match event {
        EngineEvent::PlaybackFailed { track_id, .. } => {
            assert_eq!(track_id, Some(TrackId::new("lost")));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(!harness.snapshot().await.playback.is_playing);

    // Sibling layers are unaffected.
    harness.send(EngineCommand::AddSound(track("rain"))).await;
    harness
        .wait_for(|s| s.channel("rain").map(|c| c.status == ChannelStatus::Playing).unwrap_or(false))
        .await;

    harness.stop().await;
}

#[tokio::test]
async fn layer_without_source_never_plays() {
    let harness = Harness::start();
    harness.send(EngineCommand::AddSoundById(TrackId::new("hum"))).await;

    let snapshot = harness.wait_for(|s| s.channel("hum").is_some()).await;
    assert_eq!(snapshot.channel("hum").unwrap().status, ChannelStatus::Silent);

    harness.stop().await;
}

#[tokio::test]
async fn featured_track_end_is_reported() {
    let mut harness = Harness::start();
    harness.send(EngineCommand::FeatureTrack(track("chime"))).await;
    harness
        .next_event(|e| matches!(e, EngineEvent::PlaybackStarted { .. }))
        .await;

    harness.media.render(200).unwrap();
    let event = harness
        .next_event(|e| matches!(e, EngineEvent::PlaybackEnded { .. }))
        .await;
    assert_eq!(
        event,
        EngineEvent::PlaybackEnded {
            track_id: TrackId::new("chime")
        }
    );
    assert!(!harness.snapshot().await.playback.is_playing);

    harness.stop().await;
}

#[tokio::test]
async fn voice_and_keys_drive_the_transport() {
    let mut harness = Harness::start();
    harness.send(EngineCommand::FeatureTrack(track("rain"))).await;
    harness
        .next_event(|e| matches!(e, EngineEvent::PlaybackStarted { .. }))
        .await;

    let stop = ControlAction::from_voice("please stop the music").unwrap();
    harness.send(EngineCommand::Control(stop)).await;
    assert!(!harness.snapshot().await.playback.is_playing);

    let toggle = ControlAction::from_key(' ').unwrap();
    harness.send(EngineCommand::Control(toggle)).await;
    assert!(harness.snapshot().await.playback.is_playing);

    harness.send(EngineCommand::AddSound(track("fire"))).await;
    harness.send(EngineCommand::Control(ControlAction::ClearMix)).await;
    assert!(harness.snapshot().await.channels.is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn spectrum_follows_the_featured_track() {
    let mut harness = Harness::start();
    assert_eq!(harness.handle.spectrum().await.unwrap().len(), 32);

    harness.send(EngineCommand::FeatureTrack(track("rain"))).await;
    harness
        .next_event(|e| matches!(e, EngineEvent::PlaybackStarted { .. }))
        .await;
    harness.media.render(256).unwrap();

    let frame = harness.handle.spectrum().await.unwrap();
    assert!(frame.bins().iter().any(|&b| b > 0));
    assert_eq!(frame.bars(20).len(), 20);

    harness.stop().await;
}

#[tokio::test]
async fn binaural_runs_in_its_own_context() {
    let mut harness = Harness::start();
    harness
        .send(EngineCommand::ApplyBinauralPreset(BinauralPreset::Theta))
        .await;

    let snapshot = harness.snapshot().await;
    assert!(snapshot.binaural.running);
    assert_eq!(snapshot.binaural.left_hz(), 150.0);
    assert_eq!(snapshot.binaural.right_hz(), 156.0);
    assert_eq!(harness.binaural_contexts.created_count(), 1);

    harness.send(EngineCommand::SetBinauralBeat(80.0)).await;
    assert_eq!(harness.snapshot().await.binaural.beat_hz, 50.0);

    harness
        .send(EngineCommand::StartBinaural {
            base_hz: 200.0,
            beat_hz: 10.0,
            volume: 0.4,
        })
        .await;
    let _ = harness.snapshot().await;
    assert_eq!(harness.binaural_contexts.created_count(), 2);
    assert!(harness.drain_events().is_empty());

    let binaural = harness.binaural_contexts.last().unwrap();
    harness.stop().await;
    assert_eq!(binaural.state(), ContextState::Closed);
}

#[tokio::test]
async fn shutdown_closes_the_media_context() {
    let harness = Harness::start();
    harness.send(EngineCommand::AddSound(track("rain"))).await;
    let media = harness.media.clone();

    harness.stop().await;
    assert_eq!(media.state(), ContextState::Closed);
}

#[tokio::test]
async fn dropping_every_handle_stops_the_engine() {
    let Harness { handle, task, .. } = Harness::start();
    drop(handle);
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn cancelled_sleep_timer_never_pauses() {
    let mut harness = Harness::start();
    harness.send(EngineCommand::FeatureTrack(track("rain"))).await;
    harness
        .next_event(|e| matches!(e, EngineEvent::PlaybackStarted { .. }))
        .await;

    harness
        .send(EngineCommand::StartSleepTimer(SleepPreset::Minutes15))
        .await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    harness.send(EngineCommand::CancelSleepTimer).await;
    assert!(harness.snapshot().await.sleep_remaining.is_none());

    tokio::time::sleep(Duration::from_secs(20 * 60)).await;
    let snapshot = harness.snapshot().await;
    assert!(snapshot.playback.is_playing);
    assert!(!harness
        .drain_events()
        .iter()
        .any(|e| *e == EngineEvent::SleepTimerExpired));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn sleep_timer_pauses_playback_at_zero() {
    let mut harness = Harness::start();
    harness.send(EngineCommand::FeatureTrack(track("rain"))).await;
    harness
        .next_event(|e| matches!(e, EngineEvent::PlaybackStarted { .. }))
        .await;

    harness
        .send(EngineCommand::StartSleepTimer(SleepPreset::Minutes15))
        .await;
    tokio::time::sleep(Duration::from_secs(10 * 60)).await;
    let remaining = harness.snapshot().await.sleep_remaining.unwrap();
    assert!(remaining > Duration::ZERO && remaining <= Duration::from_secs(5 * 60 + 1));

    harness
        .next_event(|e| *e == EngineEvent::SleepTimerExpired)
        .await;
    let snapshot = harness.snapshot().await;
    assert!(!snapshot.playback.is_playing);
    assert!(snapshot.sleep_remaining.is_none());

    harness.stop().await;
}
