use crate::device::DeviceHandle;
use crate::graph::AudioGraph;
use crate::GraphError;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};

/// Lifecycle of a processing context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Created but not yet allowed to produce sound
    Suspended,
    Running,
    /// Torn down. Terminal.
    Closed,
}

struct Inner {
    label: String,
    graph: Arc<Mutex<AudioGraph>>,
    device: Mutex<Option<DeviceHandle>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(device) = self.device.get_mut() {
            if let Some(device) = device.take() {
                device.close();
            }
        }
    }
}

/// A graph plus the clock that drives it.
///
/// Device contexts are rendered by the output callback; offline contexts are
/// rendered explicitly with [`AudioContext::render`]. Clones share the same
/// graph.
#[derive(Clone)]
pub struct AudioContext {
    inner: Arc<Inner>,
}

impl AudioContext {
    pub fn offline(label: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                label: label.into(),
                graph: Arc::new(Mutex::new(AudioGraph::new(sample_rate))),
                device: Mutex::new(None),
            }),
        }
    }

    /// Context rendering into an output device. Starts suspended.
    pub fn open_device(label: impl Into<String>, device_name: Option<String>, sample_rate: u32) -> Result<Self, GraphError> {
        let label = label.into();
        let graph = Arc::new(Mutex::new(AudioGraph::new(sample_rate)));
        let device = DeviceHandle::spawn(graph.clone(), device_name)?;
        if device.sample_rate() != sample_rate {
            debug!(
                "Context '{}' runs at device rate {} Hz instead of {} Hz",
                label,
                device.sample_rate(),
                sample_rate
            );
        }

        Ok(Self {
            inner: Arc::new(Inner {
                label,
                graph,
                device: Mutex::new(Some(device)),
            }),
        })
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    fn lock_graph(&self) -> Result<MutexGuard<'_, AudioGraph>, GraphError> {
        self.inner
            .graph
            .lock()
            .map_err(|_| GraphError::Device("graph lock poisoned".to_string()))
    }

    pub fn state(&self) -> ContextState {
        self.lock_graph()
            .map(|g| g.state())
            .unwrap_or(ContextState::Closed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock_graph().map(|g| g.sample_rate()).unwrap_or(0)
    }

    pub fn current_time(&self) -> f64 {
        self.lock_graph().map(|g| g.current_time()).unwrap_or(0.0)
    }

    pub fn is_offline(&self) -> bool {
        self.inner
            .device
            .lock()
            .map(|d| d.is_none())
            .unwrap_or(true)
    }

    fn with_device<F>(&self, f: F) -> Result<(), GraphError>
    where
        F: FnOnce(&DeviceHandle) -> Result<(), GraphError>,
    {
        let device = self
            .inner
            .device
            .lock()
            .map_err(|_| GraphError::Device("device lock poisoned".to_string()))?;
        match device.as_ref() {
            Some(device) => f(device),
            None => Ok(()),
        }
    }

    /// Let the context produce sound. Calling it while running is a no-op.
    pub fn resume(&self) -> Result<(), GraphError> {
        match self.state() {
            ContextState::Running => Ok(()),
            ContextState::Closed => Err(GraphError::Closed),
            ContextState::Suspended => {
                self.with_device(|d| d.play())?;
                self.lock_graph()?.set_state(ContextState::Running);
                info!("Audio context '{}' running", self.label());
                Ok(())
            }
        }
    }

    pub fn suspend(&self) -> Result<(), GraphError> {
        match self.state() {
            ContextState::Suspended => Ok(()),
            ContextState::Closed => Err(GraphError::Closed),
            ContextState::Running => {
                self.lock_graph()?.set_state(ContextState::Suspended);
                self.with_device(|d| d.pause())?;
                debug!("Audio context '{}' suspended", self.label());
                Ok(())
            }
        }
    }

    /// Tear down every node and release the device. Safe to repeat.
    pub fn close(&self) {
        match self.lock_graph() {
            Ok(mut graph) => {
                if graph.state() == ContextState::Closed {
                    return;
                }
                graph.set_state(ContextState::Closed);
                graph.clear();
            }
            Err(e) => warn!("Closing context '{}' with a broken graph: {}", self.label(), e),
        }

        let device = self.inner.device.lock().ok().and_then(|mut d| d.take());
        if let Some(device) = device {
            device.close();
        }
        info!("Audio context '{}' closed", self.label());
    }

    /// Run `f` against the graph of an open context
    pub fn with_graph<R, F>(&self, f: F) -> Result<R, GraphError>
    where
        F: FnOnce(&mut AudioGraph) -> Result<R, GraphError>,
    {
        let mut graph = self.lock_graph()?;
        if graph.state() == ContextState::Closed {
            return Err(GraphError::Closed);
        }
        f(&mut graph)
    }

    /// Render interleaved stereo frames. Offline contexts only.
    pub fn render(&self, frames: usize) -> Result<Vec<f32>, GraphError> {
        if !self.is_offline() {
            return Err(GraphError::Device(
                "render is driven by the output device".to_string(),
            ));
        }
        Ok(self.lock_graph()?.render_frames(frames))
    }
}

/// Creates processing contexts on demand
pub trait ContextFactory: Send + Sync {
    fn create(&self, label: &str) -> Result<AudioContext, GraphError>;
}

/// Contexts backed by the system output device
pub struct DeviceContextFactory {
    device_name: Option<String>,
    sample_rate: u32,
}

impl DeviceContextFactory {
    pub fn new(device_name: Option<String>, sample_rate: u32) -> Self {
        Self {
            device_name: device_name.filter(|n| !n.is_empty()),
            sample_rate,
        }
    }
}

impl ContextFactory for DeviceContextFactory {
    fn create(&self, label: &str) -> Result<AudioContext, GraphError> {
        AudioContext::open_device(label, self.device_name.clone(), self.sample_rate)
    }
}

/// Offline contexts, remembered so the caller can render them
pub struct OfflineContextFactory {
    sample_rate: u32,
    created: Mutex<Vec<AudioContext>>,
}

impl OfflineContextFactory {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Most recently created context
    pub fn last(&self) -> Option<AudioContext> {
        self.created.lock().ok().and_then(|c| c.last().cloned())
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl ContextFactory for OfflineContextFactory {
    fn create(&self, label: &str) -> Result<AudioContext, GraphError> {
        let context = AudioContext::offline(label, self.sample_rate);
        if let Ok(mut created) = self.created.lock() {
            created.push(context.clone());
        }
        Ok(context)
    }
}
