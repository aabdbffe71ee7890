//! Diagnostics sink plumbing.
//!
//! Events are purely observational: the polling loop emits them with
//! `try_send` and drops them when the sink is full or nobody drains it, so an
//! absent or slow consumer never changes protocol behavior. Verbosity is a
//! runtime setting, filtered at the emission site.

use log::{log, Level};

use crate::report::PeripheralReport;
use crate::{ControllerStatus, DiagnosticsQueueSender, RadioError};

/// Runtime verbosity of the diagnostics sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticsLevel {
    /// No events at all.
    Quiet,
    /// Operational outcomes: transmissions, reports, dropped frames, errors.
    Normal,
    /// Everything, including status transitions, busy-channel samples and
    /// routine receive timeouts.
    Verbose,
}

/// Human-readable events produced by the polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    StatusChanged(ControllerStatus),
    TransmitSucceeded { cycle: u8, peripheral_id: u8, data_rate_bps: u32 },
    TransmitFailed(RadioError),
    ReceiveFailed(RadioError),
    ChannelBusy { rssi_dbm: i16 },
    DuplicateCycleDropped { cycle: u8 },
    UnrecognizedMessageType { message_type: u8 },
    MalformedReport { cycle: u8 },
    ReportReceived(PeripheralReport),
    InitializationFailed,
}

impl ControllerEvent {
    /// Minimum sink verbosity at which this event is emitted.
    fn min_level(&self) -> DiagnosticsLevel {
        match self {
            ControllerEvent::StatusChanged(_) => DiagnosticsLevel::Verbose,
            ControllerEvent::ChannelBusy { .. } => DiagnosticsLevel::Verbose,
            // Receive timeouts are routine while polling and would dominate
            // the sink at normal verbosity.
            ControllerEvent::ReceiveFailed(RadioError::RxTimeout) => DiagnosticsLevel::Verbose,
            _ => DiagnosticsLevel::Normal,
        }
    }
}

/// Sender half of the diagnostics queue plus its verbosity setting.
pub(crate) struct DiagnosticsEmitter {
    sender: DiagnosticsQueueSender,
    level: DiagnosticsLevel,
}

impl DiagnosticsEmitter {
    pub(crate) fn new(sender: DiagnosticsQueueSender, level: DiagnosticsLevel) -> Self {
        DiagnosticsEmitter { sender, level }
    }

    pub(crate) fn emit(&self, event: ControllerEvent) {
        if self.level < event.min_level() {
            return;
        }
        if self.sender.try_send(event).is_err() {
            log!(Level::Trace, "diagnostics queue full, dropping event");
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::DiagnosticsQueue;
    use embassy_sync::channel::Channel;

    fn emitter_with_queue(level: DiagnosticsLevel) -> (DiagnosticsEmitter, &'static DiagnosticsQueue) {
        let queue: &'static DiagnosticsQueue = Box::leak(Box::new(Channel::new()));
        (DiagnosticsEmitter::new(queue.sender(), level), queue)
    }

    #[test]
    fn quiet_sink_receives_nothing() {
        let (emitter, queue) = emitter_with_queue(DiagnosticsLevel::Quiet);
        emitter.emit(ControllerEvent::InitializationFailed);
        emitter.emit(ControllerEvent::StatusChanged(ControllerStatus::Idle));
        assert!(queue.try_receive().is_err());
    }

    #[test]
    fn normal_sink_filters_verbose_events() {
        let (emitter, queue) = emitter_with_queue(DiagnosticsLevel::Normal);
        emitter.emit(ControllerEvent::StatusChanged(ControllerStatus::Idle));
        emitter.emit(ControllerEvent::ReceiveFailed(RadioError::RxTimeout));
        assert!(queue.try_receive().is_err());

        emitter.emit(ControllerEvent::TransmitFailed(RadioError::TxTimeout));
        assert_eq!(queue.try_receive().unwrap(), ControllerEvent::TransmitFailed(RadioError::TxTimeout));
    }

    #[test]
    fn verbose_sink_receives_status_transitions() {
        let (emitter, queue) = emitter_with_queue(DiagnosticsLevel::Verbose);
        emitter.emit(ControllerEvent::StatusChanged(ControllerStatus::RequestingReport));
        assert_eq!(
            queue.try_receive().unwrap(),
            ControllerEvent::StatusChanged(ControllerStatus::RequestingReport)
        );
    }

    #[test]
    fn full_queue_drops_events_without_failing() {
        let (emitter, queue) = emitter_with_queue(DiagnosticsLevel::Normal);
        for _ in 0..crate::DIAGNOSTICS_QUEUE_SIZE + 3 {
            emitter.emit(ControllerEvent::InitializationFailed);
        }
        let mut drained = 0;
        while queue.try_receive().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, crate::DIAGNOSTICS_QUEUE_SIZE);
    }
}
