//! HTTP/2 flow control
//!
//! Window accounting per RFC 7540 Section 5.2, applied at both the
//! connection and the stream level. Windows are kept as signed 64-bit
//! values so a SETTINGS_INITIAL_WINDOW_SIZE reduction can push them
//! negative without wrapping; the wire-visible range stays within
//! [-2^31, 2^31-1].

use super::DEFAULT_INITIAL_WINDOW_SIZE;

/// Largest legal window value (2^31 - 1)
pub const MAX_WINDOW_SIZE: i64 = 0x7FFF_FFFF;

/// Window accounting failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    /// WINDOW_UPDATE carried a zero increment
    ZeroIncrement,
    /// The update would push the window past 2^31 - 1
    Overflow,
}

/// A single flow-control window.
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    initial_size: u32,
    current: i64,
}

impl FlowControlWindow {
    /// Create a window with the default initial size
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Create a window with a specific initial size
    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            current: initial_size as i64,
        }
    }

    /// Current window value (may be negative)
    pub fn size(&self) -> i64 {
        self.current
    }

    /// Capacity usable right now (zero when the window is non-positive)
    pub fn available(&self) -> usize {
        self.current.max(0) as usize
    }

    /// Subtract consumed capacity; the window may go negative
    pub fn debit(&mut self, amount: usize) {
        self.current -= amount as i64;
    }

    /// Apply a WINDOW_UPDATE increment
    pub fn credit(&mut self, increment: u32) -> Result<(), WindowError> {
        if increment == 0 {
            return Err(WindowError::ZeroIncrement);
        }
        let new_size = self.current + increment as i64;
        if new_size > MAX_WINDOW_SIZE {
            return Err(WindowError::Overflow);
        }
        self.current = new_size;
        Ok(())
    }

    /// Re-base on a changed SETTINGS_INITIAL_WINDOW_SIZE.
    ///
    /// The delta between old and new initial sizes is applied to the
    /// current value (RFC 7540 Section 6.9.2). Reductions may leave the
    /// window negative; growth past 2^31-1 is an error.
    pub fn update_initial_size(&mut self, new_initial: u32) -> Result<(), WindowError> {
        let delta = new_initial as i64 - self.initial_size as i64;
        let new_current = self.current + delta;
        if new_current > MAX_WINDOW_SIZE {
            return Err(WindowError::Overflow);
        }
        self.initial_size = new_initial;
        self.current = new_current;
        Ok(())
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection-level send/receive windows
#[derive(Debug)]
pub struct ConnectionFlowControl {
    send_window: FlowControlWindow,
    recv_window: FlowControlWindow,
}

impl ConnectionFlowControl {
    /// Create connection windows at the protocol defaults
    pub fn new() -> Self {
        ConnectionFlowControl {
            send_window: FlowControlWindow::new(),
            recv_window: FlowControlWindow::new(),
        }
    }

    /// Send window (peer-controlled, debited when we emit DATA)
    pub fn send_window(&self) -> &FlowControlWindow {
        &self.send_window
    }

    /// Mutable send window
    pub fn send_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.send_window
    }

    /// Receive window (our advertisement, debited when DATA arrives)
    pub fn recv_window(&self) -> &FlowControlWindow {
        &self.recv_window
    }

    /// Mutable receive window
    pub fn recv_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.recv_window
    }
}

impl Default for ConnectionFlowControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream-level send/receive windows
#[derive(Debug)]
pub struct StreamFlowControl {
    send_window: FlowControlWindow,
    recv_window: FlowControlWindow,
}

impl StreamFlowControl {
    /// Create stream windows with the negotiated initial sizes
    pub fn with_initial_sizes(send_size: u32, recv_size: u32) -> Self {
        StreamFlowControl {
            send_window: FlowControlWindow::with_initial_size(send_size),
            recv_window: FlowControlWindow::with_initial_size(recv_size),
        }
    }

    /// Send window
    pub fn send_window(&self) -> &FlowControlWindow {
        &self.send_window
    }

    /// Mutable send window
    pub fn send_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.send_window
    }

    /// Receive window
    pub fn recv_window(&self) -> &FlowControlWindow {
        &self.recv_window
    }

    /// Mutable receive window
    pub fn recv_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.recv_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_starts_at_initial() {
        let window = FlowControlWindow::new();
        assert_eq!(window.size(), DEFAULT_INITIAL_WINDOW_SIZE as i64);
        assert_eq!(window.available(), DEFAULT_INITIAL_WINDOW_SIZE as usize);
    }

    #[test]
    fn test_debit_and_credit() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.debit(60);
        assert_eq!(window.size(), 40);

        window.credit(25).unwrap();
        assert_eq!(window.size(), 65);
    }

    #[test]
    fn test_zero_increment_rejected() {
        let mut window = FlowControlWindow::new();
        assert_eq!(window.credit(0), Err(WindowError::ZeroIncrement));
    }

    #[test]
    fn test_overflow_rejected() {
        let mut window = FlowControlWindow::with_initial_size(0x7FFF_FFFF);
        assert_eq!(window.credit(1), Err(WindowError::Overflow));
        // Window unchanged after the failed update
        assert_eq!(window.size(), MAX_WINDOW_SIZE);
    }

    #[test]
    fn test_window_may_go_negative() {
        let mut window = FlowControlWindow::with_initial_size(10);
        window.debit(10);
        assert_eq!(window.size(), 0);
        assert_eq!(window.available(), 0);

        // A shrunken initial size drives it negative
        window.update_initial_size(4).unwrap();
        assert_eq!(window.size(), -6);
        assert_eq!(window.available(), 0);

        // Credits bring it back up
        window.credit(8).unwrap();
        assert_eq!(window.size(), 2);
        assert_eq!(window.available(), 2);
    }

    #[test]
    fn test_update_initial_size_applies_delta() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.debit(50);
        assert_eq!(window.size(), 50);

        window.update_initial_size(200).unwrap();
        assert_eq!(window.size(), 150);

        window.update_initial_size(150).unwrap();
        assert_eq!(window.size(), 100);
    }

    #[test]
    fn test_update_initial_size_overflow() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.credit(0x7FFF_FF00).unwrap();
        assert!(window.update_initial_size(0x7FFF_FFFF).is_err());
    }

    #[test]
    fn test_connection_flow_control() {
        let mut flow = ConnectionFlowControl::new();
        flow.send_window_mut().debit(1000);
        assert_eq!(
            flow.send_window().size(),
            DEFAULT_INITIAL_WINDOW_SIZE as i64 - 1000
        );

        flow.recv_window_mut().debit(500);
        flow.recv_window_mut().credit(500).unwrap();
        assert_eq!(flow.recv_window().size(), DEFAULT_INITIAL_WINDOW_SIZE as i64);
    }

    #[test]
    fn test_stream_flow_control_initial_sizes() {
        let flow = StreamFlowControl::with_initial_sizes(100, 200);
        assert_eq!(flow.send_window().size(), 100);
        assert_eq!(flow.recv_window().size(), 200);
    }
}
