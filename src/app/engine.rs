use super::commands::{Completion, EngineCommand, LookupPurpose};
use super::interpreter::{CommandInterpreter, ResolvedMix};
use super::{ChannelSnapshot, EngineHandle, EngineSnapshot};
use crate::audio::{
    BinauralSynthesizer, LoadRequest, MixerEngine, PlaybackController, PlaybackError,
    SpatialBlender, SleepTimer,
};
use crate::catalog::{InteractionLogger, TrackCatalog};
use crate::ui::commands::ControlAction;
use audio_io::{AudioContext, ContextFactory, MediaError, MediaLoader, PcmBuffer};
use aura_core::{EngineEvent, Error, InteractionEvent, MixCommand, TrackId};
use log::{debug, error, info, warn};
use settings_manager::EngineSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use visualization::{AnalyzerSettings, FrequencyAnalyzer};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 64;

/// How often the featured track is checked for its end
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Services the engine talks to but does not own
pub struct Collaborators {
    pub catalog: Arc<dyn TrackCatalog>,
    pub interactions: Arc<dyn InteractionLogger>,
    pub media: Arc<dyn MediaLoader>,
    /// Creates the separate context each binaural session runs in
    pub binaural_contexts: Arc<dyn ContextFactory>,
}

/// Composition root. Owns every audio component and processes one command
/// at a time.
pub struct Engine {
    settings: EngineSettings,
    context: AudioContext,
    playback: PlaybackController,
    mixer: MixerEngine,
    binaural: BinauralSynthesizer,
    blender: SpatialBlender,
    sleep_timer: SleepTimer,
    analyzer: FrequencyAnalyzer,
    interpreter: CommandInterpreter,
    catalog: Arc<dyn TrackCatalog>,
    interactions: Arc<dyn InteractionLogger>,
    media: Arc<dyn MediaLoader>,
    /// Commands from collaborators
    command_rx: mpsc::Receiver<EngineCommand>,
    /// Completions of work handed off to other tasks
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    /// Notices for the host UI
    event_tx: mpsc::Sender<EngineEvent>,
    /// Identifies the newest mix command still resolving
    mix_ticket: u64,
}

impl Engine {
    /// Build the engine around the media context. Returns the engine, a
    /// handle to drive it, and the event stream for the host UI.
    pub fn new(
        settings: EngineSettings,
        context: AudioContext,
        collaborators: Collaborators,
    ) -> Result<(Self, EngineHandle, mpsc::Receiver<EngineEvent>), Error> {
        settings.validate()?;

        let playback = PlaybackController::new(context.clone(), &settings.playback)?;
        let mixer = MixerEngine::new(context.clone(), &settings.mixer);
        let binaural =
            BinauralSynthesizer::new(collaborators.binaural_contexts, settings.binaural.clone());

        let analyzer_config = &settings.analyzer;
        let mut analyzer = FrequencyAnalyzer::new(AnalyzerSettings {
            fft_size: analyzer_config.fft_size,
            smoothing: analyzer_config.smoothing,
            min_decibels: analyzer_config.min_decibels,
            max_decibels: analyzer_config.max_decibels,
        })?;
        analyzer.attach(&context, playback.output_node())?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let engine = Self {
            settings,
            context,
            playback,
            mixer,
            binaural,
            blender: SpatialBlender::new(),
            sleep_timer: SleepTimer::new(),
            analyzer,
            interpreter: CommandInterpreter::new(collaborators.catalog.clone()),
            catalog: collaborators.catalog,
            interactions: collaborators.interactions,
            media: collaborators.media,
            command_rx,
            completion_tx,
            completion_rx,
            event_tx,
            mix_ticket: 0,
        };

        Ok((engine, EngineHandle::new(command_tx), event_rx))
    }

    /// Run until a shutdown command arrives or every handle is dropped
    pub async fn run(&mut self) -> Result<(), Error> {
        info!("Engine started on '{}'", self.context.label());
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(EngineCommand::Shutdown) => {
                            info!("Received shutdown command, stopping engine");
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => {
                            info!("All engine handles dropped, stopping engine");
                            break;
                        }
                    }
                }

                Some(completion) = self.completion_rx.recv() => {
                    self.handle_completion(completion);
                }

                _ = ticker.tick() => {
                    if let Some(track_id) = self.playback.poll() {
                        self.emit(EngineEvent::PlaybackEnded { track_id });
                    }
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::FeatureTrack(track) => {
                self.transport(|playback| playback.set_track(track));
            }
            EngineCommand::FeatureTrackById(id) => self.lookup(id, LookupPurpose::Feature),
            EngineCommand::TogglePlay => self.transport(|playback| playback.toggle_play()),
            EngineCommand::SetPlaying(playing) => {
                self.transport(|playback| playback.set_playing(playing));
            }
            EngineCommand::SetVolume(volume) => self.playback.set_volume(volume),
            EngineCommand::ToggleMute => self.playback.toggle_mute(),
            EngineCommand::SetMuted(muted) => self.playback.set_muted(muted),
            EngineCommand::ToggleZenMode => self.playback.toggle_zen_mode(),
            EngineCommand::Seek(seconds) => {
                if let Err(e) = self.playback.seek(seconds) {
                    warn!("Seek failed: {}", e);
                }
            }
            EngineCommand::StopAll => {
                self.playback.stop_all();
                self.clear_mix();
            }

            EngineCommand::AddSound(track) => {
                if let Some(request) = self.mixer.add_sound(track) {
                    self.load_layer(request);
                }
            }
            EngineCommand::AddSoundById(id) => self.lookup(id, LookupPurpose::Layer),
            EngineCommand::RemoveSound(id) => {
                self.mixer.remove_sound(&id);
            }
            EngineCommand::UpdateVolume { id, volume } => {
                self.mixer.update_volume(&id, volume);
            }
            EngineCommand::StopMix => self.clear_mix(),
            EngineCommand::ToggleMixer => self.mixer.toggle_mixer(),
            EngineCommand::SetMixerOpen(open) => self.mixer.set_mixer_open(open),
            EngineCommand::ApplyMix(command) => self.resolve_mix(command),
            EngineCommand::ApplyMixJson(payload) => match MixCommand::from_json_str(&payload) {
                Ok(command) => self.resolve_mix(command),
                Err(e) => {
                    warn!("Rejected mix command: {}", e);
                    self.emit(EngineEvent::MixRejected {
                        reason: e.to_string(),
                    });
                }
            },

            EngineCommand::BlendPress { x, y } => self.blender.press(x, y, &mut self.mixer),
            EngineCommand::BlendMove { x, y } => self.blender.move_to(x, y, &mut self.mixer),
            EngineCommand::BlendRelease => self.blender.release(),

            EngineCommand::StartBinaural {
                base_hz,
                beat_hz,
                volume,
            } => {
                let result = self.binaural.start(base_hz, beat_hz, volume);
                self.report_binaural(result);
            }
            EngineCommand::SetBinauralBase(hz) => self.binaural.set_base(hz),
            EngineCommand::SetBinauralBeat(hz) => self.binaural.set_beat(hz),
            EngineCommand::SetBinauralVolume(volume) => self.binaural.set_volume(volume),
            EngineCommand::ApplyBinauralPreset(preset) => {
                let result = self.binaural.apply_preset(preset);
                self.report_binaural(result);
            }
            EngineCommand::StopBinaural => self.binaural.stop(),

            EngineCommand::StartSleepTimer(preset) => {
                let completions = self.completion_tx.clone();
                self.sleep_timer.start_preset(preset, move |ticket| {
                    let _ = completions.send(Completion::SleepExpired { ticket });
                });
            }
            EngineCommand::CancelSleepTimer => self.sleep_timer.cancel(),

            EngineCommand::Control(action) => self.control(action),

            EngineCommand::SampleSpectrum(reply) => {
                if self.playback.is_playing() {
                    self.analyzer.resume();
                }
                let _ = reply.send(self.analyzer.sample());
            }
            EngineCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }

            EngineCommand::Shutdown => {
                // Handled by the run loop
                debug!("Shutdown reached the command handler");
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::FocusLoaded { request, media } => {
                match self.playback.fulfil(&request, media) {
                    Ok(true) => self.emit(EngineEvent::PlaybackStarted {
                        track_id: request.track_id,
                    }),
                    Ok(false) => debug!("'{}' loaded while paused", request.track_id),
                    Err(e) => self.report_playback(e),
                }
            }
            Completion::LayerLoaded { request, media } => {
                if let Err(e) = self.mixer.attach_media(&request, media) {
                    self.emit(EngineEvent::ChannelFailed {
                        track_id: request.track_id,
                        reason: e.to_string(),
                    });
                }
            }
            Completion::TrackResolved { id, purpose, result } => match (purpose, result) {
                (LookupPurpose::Feature, Ok(Some(track))) => {
                    self.transport(|playback| playback.set_track(track));
                }
                (LookupPurpose::Layer, Ok(Some(track))) => {
                    if let Some(request) = self.mixer.add_sound(track) {
                        self.load_layer(request);
                    }
                }
                (LookupPurpose::Feature, Ok(None)) => self.emit(EngineEvent::PlaybackFailed {
                    track_id: Some(id),
                    reason: "track is not in the catalog".to_string(),
                }),
                (LookupPurpose::Layer, Ok(None)) => {
                    info!("Layer '{}' is not in the catalog", id);
                }
                (purpose, Err(e)) => {
                    error!("Catalog lookup for '{}' failed: {}", id, e);
                    if purpose == LookupPurpose::Feature {
                        self.emit(EngineEvent::PlaybackFailed {
                            track_id: Some(id),
                            reason: e.to_string(),
                        });
                    }
                }
            },
            Completion::MixResolved { ticket, result } => {
                if ticket != self.mix_ticket {
                    debug!("Dropping mix {} superseded by {}", ticket, self.mix_ticket);
                    return;
                }
                match result {
                    Ok(resolved) => self.apply_mix(resolved),
                    Err(e) => {
                        warn!("Mix command rejected: {}", e);
                        self.emit(EngineEvent::MixRejected {
                            reason: e.to_string(),
                        });
                    }
                }
            }
            Completion::StaggerDue {
                generation,
                volumes,
            } => {
                CommandInterpreter::apply_volumes(generation, &volumes, &mut self.mixer);
            }
            Completion::SleepExpired { ticket } => {
                if !self.sleep_timer.is_current(ticket) {
                    debug!("Ignoring expiry of a cancelled sleep timer");
                    return;
                }
                self.sleep_timer.cancel();
                self.transport(|playback| playback.set_playing(false));
                self.emit(EngineEvent::SleepTimerExpired);
            }
        }
    }

    fn control(&mut self, action: ControlAction) {
        debug!("Control action {:?}", action);
        match action {
            ControlAction::Play => self.transport(|playback| playback.set_playing(true)),
            ControlAction::Stop => self.transport(|playback| playback.set_playing(false)),
            ControlAction::TogglePlay => self.transport(|playback| playback.toggle_play()),
            ControlAction::ToggleMute => self.playback.toggle_mute(),
            ControlAction::SetMuted(muted) => self.playback.set_muted(muted),
            ControlAction::ToggleZen => self.playback.toggle_zen_mode(),
            ControlAction::ClearMix => {
                for id in self.mixer.channel_ids() {
                    self.mixer.remove_sound(&id);
                }
            }
        }
    }

    /// Run a transport call, then start any load it asked for, report
    /// failures and log a transition into playback
    fn transport<F>(&mut self, call: F)
    where
        F: FnOnce(&mut PlaybackController) -> Result<Option<LoadRequest>, PlaybackError>,
    {
        let before_id = self.playback.current_track().map(|t| t.id.clone());
        let was_playing = self.playback.is_playing();

        match call(&mut self.playback) {
            Ok(Some(request)) => self.load_focus(request),
            Ok(None) => {
                if !was_playing && self.playback.is_playing() && !self.playback.is_loading() {
                    if let Some(track) = self.playback.current_track() {
                        let track_id = track.id.clone();
                        self.emit(EngineEvent::PlaybackStarted { track_id });
                    }
                }
            }
            Err(e) => self.report_playback(e),
        }

        if !self.playback.is_playing() {
            return;
        }
        if let Some(track) = self.playback.current_track() {
            if !was_playing || before_id.as_ref() != Some(&track.id) {
                self.log_interaction(track.id.clone());
            }
        }
    }

    fn report_playback(&self, error: PlaybackError) {
        if error.is_benign() {
            debug!("Ignoring interrupted playback request");
            return;
        }
        self.emit(EngineEvent::PlaybackFailed {
            track_id: self.playback.current_track().map(|t| t.id.clone()),
            reason: error.to_string(),
        });
    }

    fn report_binaural(&self, result: Result<(), Error>) {
        if let Err(e) = result {
            error!("Binaural generator failed: {}", e);
            self.emit(EngineEvent::BinauralFailed {
                reason: e.to_string(),
            });
        }
    }

    fn clear_mix(&mut self) {
        // Outstanding mix commands would otherwise land after the clear.
        self.mix_ticket += 1;
        self.mixer.stop_all();
    }

    fn resolve_mix(&mut self, command: MixCommand) {
        self.mix_ticket += 1;
        let ticket = self.mix_ticket;
        let interpreter = self.interpreter.clone();
        let completions = self.completion_tx.clone();

        tokio::spawn(async move {
            let result = interpreter.resolve(&command).await;
            let _ = completions.send(Completion::MixResolved { ticket, result });
        });
    }

    fn apply_mix(&mut self, resolved: ResolvedMix) {
        if resolved.pause_focus {
            self.transport(|playback| playback.set_playing(false));
        }

        let applied = CommandInterpreter::apply(&resolved, &mut self.mixer);
        for request in applied.requests {
            self.load_layer(request);
        }

        let stagger = self.settings.mixer.command_stagger();
        if stagger.is_zero() {
            CommandInterpreter::apply_volumes(applied.generation, &applied.volumes, &mut self.mixer);
        } else {
            let completions = self.completion_tx.clone();
            let generation = applied.generation;
            let volumes = applied.volumes;
            tokio::spawn(async move {
                tokio::time::sleep(stagger).await;
                let _ = completions.send(Completion::StaggerDue {
                    generation,
                    volumes,
                });
            });
        }

        info!(
            "Applied mix with {} layers ({} skipped)",
            self.mixer.len(),
            resolved.skipped.len()
        );
        self.emit(EngineEvent::MixApplied {
            channels: self.mixer.channel_ids(),
            skipped: resolved.skipped,
            mood: resolved.mood,
        });
    }

    fn lookup(&self, id: TrackId, purpose: LookupPurpose) {
        let catalog = self.catalog.clone();
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = catalog.get(&id).await;
            let _ = completions.send(Completion::TrackResolved {
                id,
                purpose,
                result,
            });
        });
    }

    fn load_focus(&self, request: LoadRequest) {
        self.spawn_load(request, |request, media| Completion::FocusLoaded {
            request,
            media,
        });
    }

    fn load_layer(&self, request: LoadRequest) {
        self.spawn_load(request, |request, media| Completion::LayerLoaded {
            request,
            media,
        });
    }

    fn spawn_load<F>(&self, request: LoadRequest, complete: F)
    where
        F: FnOnce(LoadRequest, Result<Arc<PcmBuffer>, MediaError>) -> Completion + Send + 'static,
    {
        let loader = self.media.clone();
        let completions = self.completion_tx.clone();
        debug!("Loading '{}' for '{}'", request.locator, request.track_id);

        tokio::spawn(async move {
            let locator = request.locator.clone();
            let media = match tokio::task::spawn_blocking(move || loader.load(&locator)).await {
                Ok(media) => media,
                Err(e) => Err(MediaError::Io(format!("loader task failed: {}", e))),
            };
            let _ = completions.send(complete(request, media));
        });
    }

    fn log_interaction(&self, track_id: TrackId) {
        let logger = self.interactions.clone();
        tokio::spawn(async move {
            if let Err(e) = logger.log(InteractionEvent::play(track_id)).await {
                warn!("Failed to log interaction: {}", e);
            }
        });
    }

    fn emit(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            debug!("Dropping engine event: {}", e);
        }
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            playback: self.playback.state().clone(),
            position: self.playback.position(),
            duration: self.playback.duration(),
            loading: self.playback.is_loading(),
            channels: self
                .mixer
                .channels()
                .iter()
                .map(|c| ChannelSnapshot {
                    track_id: c.track.id.clone(),
                    title: c.track.title.clone(),
                    volume: c.volume,
                    status: c.status.clone(),
                })
                .collect(),
            mixer_open: self.mixer.is_open(),
            mood: self.mixer.mood().map(str::to_string),
            blend: self.blender.position(),
            binaural: self.binaural.snapshot(),
            sleep_remaining: self.sleep_timer.remaining(),
        }
    }

    /// The media context, for hosts that render offline
    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    fn shutdown(&mut self) {
        self.sleep_timer.cancel();
        self.binaural.stop();
        self.analyzer.detach();
        self.mixer.stop_all();
        self.playback.stop_all();
        self.context.close();
        info!("Engine stopped");
    }
}
