/// Falling-edge detector for the active-low acknowledge button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEdge {
    last_high: bool,
}

impl Default for ButtonEdge {
    fn default() -> Self {
        // Pulled up: released reads high.
        Self { last_high: true }
    }
}

impl ButtonEdge {
    pub fn last_high(&self) -> bool {
        self.last_high
    }

    /// High on the previous sample, low now.
    pub fn is_falling(&self, high: bool) -> bool {
        self.last_high && !high
    }

    pub fn update(&mut self, high: bool) {
        self.last_high = high;
    }
}
