//! Services the engine needs from the host renderer

/// Outward calls the engine makes into the host
///
/// Implementations must be cheap to call; the engine queries the world
/// identity and frame extent on hot paths.
pub trait EngineHost: Send + Sync {
    /// Current world identity such as `minecraft:overworld`, `None` outside a world
    fn world_identity(&self) -> Option<String>;

    /// Active locale, e.g. `en_us`
    fn locale(&self) -> String {
        sulkan_pack::manifest::lang::DEFAULT_LOCALE.to_string()
    }

    /// Current swap-chain extent; `None` or a zero dimension skips compute dispatch
    fn frame_extent(&self) -> Option<(u32, u32)>;

    /// Reads the host's original text for a shader resource locator
    fn read_resource(&self, locator: &str) -> Option<String>;

    /// Reads a shader bundled with the host, addressed relative to its asset root
    fn read_bundled_shader(&self, _path: &str) -> Option<String> {
        None
    }

    /// Blocks until the GPU no longer references resources submitted so far
    fn wait_idle(&self);

    /// Schedules a full resource and pipeline reload
    fn request_reload(&self);
}
