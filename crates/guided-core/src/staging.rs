/// Host staging policy of a pipeline stage.
///
/// Controls which host-side staging buffers `init` allocates. Transfers
/// in a direction the policy excludes are silent no-ops, so a stage wired
/// device-to-device costs nothing extra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Staging {
    /// No staging buffers; the stage is wired device-to-device.
    #[default]
    None,
    /// Input staging only.
    I,
    /// Output staging only.
    O,
    /// Both directions.
    Io,
}

impl Staging {
    pub fn wants_input(self) -> bool {
        matches!(self, Staging::I | Staging::Io)
    }

    pub fn wants_output(self) -> bool {
        matches!(self, Staging::O | Staging::Io)
    }
}
