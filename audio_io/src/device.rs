//! cpal output stream hosted on a dedicated thread.
//!
//! `cpal::Stream` is not `Send` on every platform, so the thread that builds
//! the stream also owns it for its whole life and takes play/pause requests
//! over a control channel.

use crate::graph::AudioGraph;
use crate::GraphError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use log::{debug, error, info, warn};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

enum Control {
    Play(mpsc::Sender<Result<(), GraphError>>),
    Pause(mpsc::Sender<Result<(), GraphError>>),
    Close,
}

/// Handle to the output thread of one context
pub struct DeviceHandle {
    control: mpsc::Sender<Control>,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
    device_name: String,
}

impl DeviceHandle {
    /// Open `device_name` (or the default output) and render `graph` into it.
    /// The stream starts paused.
    pub fn spawn(graph: Arc<Mutex<AudioGraph>>, device_name: Option<String>) -> Result<Self, GraphError> {
        let (control_tx, control_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("aura-output".to_string())
            .spawn(move || run_output(graph, device_name, ready_tx, control_rx))
            .map_err(|e| GraphError::Device(format!("Failed to spawn output thread: {}", e)))?;

        let (sample_rate, device_name) = ready_rx
            .recv()
            .map_err(|_| GraphError::Device("Output thread exited during setup".to_string()))??;

        info!("Opened output device '{}' at {} Hz", device_name, sample_rate);
        Ok(Self {
            control: control_tx,
            thread: Some(thread),
            sample_rate,
            device_name,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn request(&self, make: fn(mpsc::Sender<Result<(), GraphError>>) -> Control) -> Result<(), GraphError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.control
            .send(make(reply_tx))
            .map_err(|_| GraphError::Device("Output thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| GraphError::Device("Output thread did not reply".to_string()))?
    }

    pub fn play(&self) -> Result<(), GraphError> {
        self.request(Control::Play)
    }

    pub fn pause(&self) -> Result<(), GraphError> {
        self.request(Control::Pause)
    }

    /// Stop the stream and join the thread
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.control.send(Control::Close);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Output thread for '{}' panicked", self.device_name);
            }
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_output(
    graph: Arc<Mutex<AudioGraph>>,
    device_name: Option<String>,
    ready: mpsc::Sender<Result<(u32, String), GraphError>>,
    control: mpsc::Receiver<Control>,
) {
    let (stream, sample_rate, name) = match open_stream(graph, device_name.as_deref()) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok((sample_rate, name.clone()))).is_err() {
        return;
    }

    while let Ok(message) = control.recv() {
        match message {
            Control::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| GraphError::Device(format!("Failed to start output stream: {}", e)));
                let _ = reply.send(result);
            }
            Control::Pause(reply) => {
                let result = stream
                    .pause()
                    .map_err(|e| GraphError::Device(format!("Failed to pause output stream: {}", e)));
                let _ = reply.send(result);
            }
            Control::Close => break,
        }
    }

    debug!("Closing output stream on '{}'", name);
    drop(stream);
}

fn open_stream(
    graph: Arc<Mutex<AudioGraph>>,
    device_name: Option<&str>,
) -> Result<(cpal::Stream, u32, String), GraphError> {
    let host = cpal::default_host();

    let named = match device_name.filter(|n| !n.is_empty()) {
        Some(wanted) => host
            .output_devices()
            .map_err(|e| GraphError::Device(format!("Failed to get output devices: {}", e)))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false)),
        None => None,
    };

    let device = named
        .or_else(|| host.default_output_device())
        .ok_or_else(|| GraphError::Device("No output device found".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let supported = device
        .default_output_config()
        .map_err(|e| GraphError::Device(format!("Default config not supported: {}", e)))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;

    graph
        .lock()
        .map_err(|_| GraphError::Device("graph lock poisoned".to_string()))?
        .set_sample_rate(sample_rate);

    let config: cpal::StreamConfig = supported.config();
    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, graph)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, graph)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, graph)?,
        other => {
            return Err(GraphError::Device(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    };

    // Some backends start streams on creation; contexts begin suspended.
    if let Err(e) = stream.pause() {
        debug!("Could not pause fresh stream on '{}': {}", name, e);
    }

    Ok((stream, sample_rate, name))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    graph: Arc<Mutex<AudioGraph>>,
) -> Result<cpal::Stream, GraphError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = channels.max(1);
    let mut stereo = Vec::<f32>::new();

    let err_fn = move |err| {
        error!("an error occurred on the output stream: {}", err);
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                stereo.resize(frames * 2, 0.0);

                // Never block the callback on the control side.
                match graph.try_lock() {
                    Ok(mut graph) => graph.render(&mut stereo),
                    Err(_) => stereo.iter_mut().for_each(|s| *s = 0.0),
                }

                for (frame, lr) in data.chunks_mut(channels).zip(stereo.chunks(2)) {
                    for (ch, sample) in frame.iter_mut().enumerate() {
                        let value = match (channels, ch) {
                            (1, _) => (lr[0] + lr[1]) * 0.5,
                            (_, 0) => lr[0],
                            (_, 1) => lr[1],
                            _ => 0.0,
                        };
                        *sample = T::from_sample(value);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| GraphError::Device(format!("Failed to build output stream: {}", e)))
}
