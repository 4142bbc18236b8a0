/// Notifications consumed by whatever draws the grid. Drawing never feeds back
/// into the sequencer.
pub trait Renderer: Send {
    fn grid_changed(&mut self);

    /// `None` clears the playback highlight.
    fn column_changed(&mut self, column: Option<usize>);

    fn loop_restarted(&mut self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn grid_changed(&mut self) {}

    fn column_changed(&mut self, _column: Option<usize>) {}
}
