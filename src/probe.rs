use crate::event::Platform;

/// Runtime-specific snapshot readers, injected so the same core serves
/// browser-embedded, mobile, and server runtimes.
///
/// Both methods are pure reads of ambient state and must not block.
pub trait RuntimeProbe: Send + Sync + 'static {
    fn session_id(&self) -> Option<String> {
        None
    }

    fn platform(&self) -> Option<Platform> {
        None
    }
}

/// Probe for server-side embedders: no session, `Platform::Server`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerProbe;

impl RuntimeProbe for ServerProbe {
    fn platform(&self) -> Option<Platform> {
        Some(Platform::Server)
    }
}

/// Fixed values, for embedders that detect their runtime once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    pub session_id: Option<String>,
    pub platform: Option<Platform>,
}

impl RuntimeProbe for StaticProbe {
    fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    fn platform(&self) -> Option<Platform> {
        self.platform.clone()
    }
}
