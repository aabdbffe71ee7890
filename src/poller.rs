//! Polling state machine.
//!
//! The only stateful, long-lived component: one task cycling through
//! request -> listen -> decode -> report. It owns the radio device, the cycle
//! sequencer, the poll schedule and the controller status exclusively; the
//! rest of the system only sees what comes out of the report and diagnostics
//! queues.

use embassy_time::{Duration, Timer};
use log::{log, Level};

use crate::channel_sense::await_clear_channel;
use crate::cycle::CycleSequencer;
use crate::diagnostics::{ControllerEvent, DiagnosticsEmitter};
use crate::frame::{Frame, MessageType};
use crate::poll_schedule::PollSchedule;
use crate::report::PeripheralReport;
use crate::{ControllerConfig, ControllerStatus, RadioDevice, RadioError, ReceivedFrame, ReportQueueSender};

/// Controller context: all mutable protocol state behind one owner.
pub(crate) struct Poller {
    status: ControllerStatus,
    cycles: CycleSequencer,
    schedule: PollSchedule,
    config: ControllerConfig,
    radio: RadioDevice,
    report_sender: ReportQueueSender,
    emitter: DiagnosticsEmitter,
}

/// Poller Task
///
/// Runs the polling state machine forever. Exactly one flow of control ever
/// touches the protocol state, so no locking is needed anywhere; failures
/// below the fatal bring-up check only ever log, emit a diagnostics event and
/// keep the loop going.
///
/// # Parameters
/// * `poller` - fully wired controller context (radio device, config,
///   schedule and queue senders)
#[cfg_attr(feature = "std", embassy_executor::task(pool_size = 4))]
#[cfg_attr(feature = "embedded", embassy_executor::task(pool_size = 1))]
pub(crate) async fn poller_task(poller: Poller) -> ! {
    poller.run().await
}

impl Poller {
    pub(crate) fn new(
        radio: RadioDevice,
        config: ControllerConfig,
        schedule: PollSchedule,
        report_sender: ReportQueueSender,
        emitter: DiagnosticsEmitter,
    ) -> Self {
        Poller {
            status: ControllerStatus::Initializing,
            cycles: CycleSequencer::new(),
            schedule,
            config,
            radio,
            report_sender,
            emitter,
        }
    }

    pub(crate) async fn run(mut self) -> ! {
        log!(Level::Info, "Poll controller task started");
        loop {
            self.step().await;
        }
    }

    fn set_status(&mut self, next: ControllerStatus) {
        log!(Level::Debug, "status {:?} -> {:?}", self.status, next);
        self.status = next;
        self.emitter.emit(ControllerEvent::StatusChanged(next));
    }

    /// One state-machine transition.
    pub(crate) async fn step(&mut self) {
        match self.status {
            ControllerStatus::Initializing => {
                if self.radio.is_initialized() {
                    log!(Level::Info, "radio device ready");
                    self.set_status(ControllerStatus::Idle);
                } else {
                    // Bring-up failure is fatal: no retry, no recovery.
                    log!(Level::Error, "radio device failed to initialize, controller halted");
                    self.emitter.emit(ControllerEvent::InitializationFailed);
                    loop {
                        core::future::pending::<()>().await;
                    }
                }
            }
            ControllerStatus::Idle => {
                self.set_status(ControllerStatus::RequestingReport);
            }
            ControllerStatus::RequestingReport => self.request_report().await,
            ControllerStatus::ListeningForResponse => self.listen().await,
            ControllerStatus::ReportTimedOut => {
                // Reserved: nothing currently transitions here.
                log!(Level::Warn, "entered reserved status ReportTimedOut, resuming polling");
                self.set_status(ControllerStatus::RequestingReport);
            }
        }
    }

    async fn request_report(&mut self) {
        let peripheral_id = self.schedule.next_target();
        let cycle = self.cycles.next_outbound_cycle();
        let frame = Frame::request_report(cycle, peripheral_id);
        log!(Level::Debug, "requesting report from peripheral {} (cycle {})", peripheral_id, cycle);

        let cleared = await_clear_channel(
            &mut self.radio,
            &self.emitter,
            self.config.sense_threshold_dbm,
            Duration::from_millis(self.config.sense_poll_interval_ms as u64),
            self.config.max_sense_wait_ms.map(|ms| Duration::from_millis(ms as u64)),
        )
        .await;
        if !cleared {
            log!(Level::Warn, "transmitting on a channel never sensed clear");
        }

        match self.radio.transmit(&frame.encode()).await {
            Ok(()) => {
                let data_rate_bps = self.radio.data_rate_bps();
                log!(Level::Info, "TX success, data rate {} bps", data_rate_bps);
                self.emitter.emit(ControllerEvent::TransmitSucceeded {
                    cycle,
                    peripheral_id,
                    data_rate_bps,
                });
            }
            Err(error) => {
                match error {
                    RadioError::FrameTooLong => log!(Level::Warn, "TX failed: frame too long"),
                    RadioError::TxTimeout => log!(Level::Warn, "TX failed: timeout"),
                    _ => log!(Level::Warn, "TX failed: {:?}", error),
                }
                self.emitter.emit(ControllerEvent::TransmitFailed(error));
            }
        }

        // Transmission failures are logged only; listening starts either way.
        self.set_status(ControllerStatus::ListeningForResponse);
    }

    async fn listen(&mut self) {
        let timeout = Duration::from_millis(self.config.receive_timeout_ms as u64);
        match self.radio.receive(timeout).await {
            Ok(received) => self.handle_frame(received).await,
            Err(RadioError::RxTimeout) => {
                // Routine while polling; anything louder than trace would
                // drown the log.
                log!(Level::Trace, "RX timeout");
                self.emitter.emit(ControllerEvent::ReceiveFailed(RadioError::RxTimeout));
            }
            Err(RadioError::CrcMismatch) => {
                log!(Level::Warn, "RX CRC error");
                self.emitter.emit(ControllerEvent::ReceiveFailed(RadioError::CrcMismatch));
            }
            Err(error) => {
                log!(Level::Warn, "RX failed: {:?}", error);
                self.emitter.emit(ControllerEvent::ReceiveFailed(error));
            }
        }
    }

    async fn handle_frame(&mut self, received: ReceivedFrame) {
        let frame = Frame::decode(&received.bytes);

        // Duplicate suppression runs before type dispatch, so a relayed echo
        // of the controller's own request never reaches the decoder.
        if !self.cycles.accept_if_new(frame.cycle()) {
            log!(Level::Debug, "dropping duplicate cycle {}", frame.cycle());
            self.emitter.emit(ControllerEvent::DuplicateCycleDropped { cycle: frame.cycle() });
            return;
        }

        log!(
            Level::Debug,
            "RX frame: cycle {}, type {}, peripheral {}",
            frame.cycle(),
            frame.message_type(),
            frame.peripheral_id()
        );

        if frame.message_type() == MessageType::ResponseReport as u8 {
            match PeripheralReport::from_frame(&frame, received.rssi_dbm) {
                Ok(report) => self.deliver_report(report).await,
                Err(_error) => {
                    log!(Level::Warn, "malformed report payload in cycle {}", frame.cycle());
                    self.emitter.emit(ControllerEvent::MalformedReport { cycle: frame.cycle() });
                }
            }
        } else {
            log!(Level::Debug, "unrecognized response message type {}", frame.message_type());
            self.emitter.emit(ControllerEvent::UnrecognizedMessageType {
                message_type: frame.message_type(),
            });
        }
    }

    async fn deliver_report(&mut self, report: PeripheralReport) {
        log!(Level::Info, "report received: {}", report);
        self.emitter.emit(ControllerEvent::ReportReceived(report.clone()));
        if self.report_sender.try_send(report).is_err() {
            log!(Level::Warn, "report queue full, dropping report");
        }

        // Give the peripheral room to breathe before the next poll.
        let settle = Duration::from_millis(self.config.settle_delay_ms as u64);
        if settle > Duration::from_millis(0) {
            Timer::after(settle).await;
        }
        self.set_status(ControllerStatus::RequestingReport);
    }
}

#[cfg(all(test, feature = "std", feature = "radio-device-simulator"))]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticsLevel;
    use crate::poll_schedule::BROADCAST_PERIPHERAL_ID;
    use crate::radio_device_simulator::{RadioInputMessage, RadioInputQueue, RadioOutputMessage, RadioOutputQueue};
    use crate::report::response_frame;
    use crate::{DiagnosticsQueue, ReportQueue};
    use embassy_sync::channel::Channel;
    use futures::executor::block_on;

    struct Harness {
        poller: Poller,
        input: &'static RadioInputQueue,
        output: &'static RadioOutputQueue,
        reports: &'static ReportQueue,
        diagnostics: &'static DiagnosticsQueue,
    }

    fn zero_delay_config() -> ControllerConfig {
        ControllerConfig {
            receive_timeout_ms: 0,
            settle_delay_ms: 0,
            sense_threshold_dbm: -90,
            sense_poll_interval_ms: 0,
            max_sense_wait_ms: None,
            diagnostics_level: DiagnosticsLevel::Verbose,
        }
    }

    fn harness(schedule: PollSchedule) -> Harness {
        let input: &'static RadioInputQueue = Box::leak(Box::new(Channel::new()));
        let output: &'static RadioOutputQueue = Box::leak(Box::new(Channel::new()));
        let reports: &'static ReportQueue = Box::leak(Box::new(Channel::new()));
        let diagnostics: &'static DiagnosticsQueue = Box::leak(Box::new(Channel::new()));

        let mut radio = RadioDevice::new();
        radio.initialize(input.receiver(), output.sender());
        let config = zero_delay_config();
        let emitter = DiagnosticsEmitter::new(diagnostics.sender(), config.diagnostics_level);
        let poller = Poller::new(radio, config, schedule, reports.sender(), emitter);

        Harness {
            poller,
            input,
            output,
            reports,
            diagnostics,
        }
    }

    impl Harness {
        /// Drive Initializing -> Idle -> RequestingReport -> transmit, leaving
        /// the machine listening. Returns the transmitted request bytes.
        async fn drive_to_listening(&mut self) -> [u8; crate::FRAME_SIZE] {
            self.input.try_send(RadioInputMessage::RssiSample(-120)).unwrap();
            self.poller.step().await;
            assert_eq!(self.poller.status, ControllerStatus::Idle);
            self.poller.step().await;
            assert_eq!(self.poller.status, ControllerStatus::RequestingReport);
            self.poller.step().await;
            assert_eq!(self.poller.status, ControllerStatus::ListeningForResponse);

            let mut transmitted = None;
            while let Ok(message) = self.output.try_receive() {
                if let RadioOutputMessage::TransmitFrame(bytes) = message {
                    transmitted = Some(bytes);
                }
            }
            transmitted.expect("no frame transmitted")
        }

        fn drain_events(&self) -> Vec<ControllerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.diagnostics.try_receive() {
                events.push(event);
            }
            events
        }
    }

    #[test]
    fn full_poll_cycle_delivers_exactly_one_report() {
        block_on(async {
            let mut harness = harness(PollSchedule::broadcast_only());
            let request_bytes = harness.drive_to_listening().await;

            let request = Frame::decode(&request_bytes);
            // Seed is 99, so the first outbound cycle is 100.
            assert_eq!(request.cycle(), 100);
            assert_eq!(request.message_type(), MessageType::RequestReport as u8);
            assert_eq!(request.peripheral_id(), BROADCAST_PERIPHERAL_ID);

            let response = response_frame(7, BROADCAST_PERIPHERAL_ID, b"42C").unwrap();
            harness
                .input
                .try_send(RadioInputMessage::DeliverFrame {
                    bytes: response.encode(),
                    rssi_dbm: -80,
                })
                .unwrap();
            harness.poller.step().await;
            assert_eq!(harness.poller.status, ControllerStatus::RequestingReport);

            let report = harness.reports.try_receive().unwrap();
            assert_eq!(report.peripheral_id(), BROADCAST_PERIPHERAL_ID);
            assert_eq!(report.sensor_text(), b"42C");
            assert_eq!(report.rssi_magnitude(), 80);
            assert!(harness.reports.try_receive().is_err());

            let events = harness.drain_events();
            let delivered = events
                .iter()
                .filter(|event| matches!(event, ControllerEvent::ReportReceived(_)))
                .count();
            assert_eq!(delivered, 1);
        });
    }

    #[test]
    fn receive_timeout_keeps_listening() {
        block_on(async {
            let mut harness = harness(PollSchedule::broadcast_only());
            harness.drive_to_listening().await;

            harness.input.try_send(RadioInputMessage::RxTimeout).unwrap();
            harness.poller.step().await;

            assert_eq!(harness.poller.status, ControllerStatus::ListeningForResponse);
            assert!(harness.reports.try_receive().is_err());
        });
    }

    #[test]
    fn crc_mismatch_keeps_listening() {
        block_on(async {
            let mut harness = harness(PollSchedule::broadcast_only());
            harness.drive_to_listening().await;

            harness.input.try_send(RadioInputMessage::CrcMismatch).unwrap();
            harness.poller.step().await;

            assert_eq!(harness.poller.status, ControllerStatus::ListeningForResponse);
            assert!(harness.reports.try_receive().is_err());
            assert!(harness
                .drain_events()
                .contains(&ControllerEvent::ReceiveFailed(RadioError::CrcMismatch)));
        });
    }

    #[test]
    fn duplicate_response_cycle_is_dropped() {
        block_on(async {
            let mut harness = harness(PollSchedule::broadcast_only());
            harness.drive_to_listening().await;

            let response = response_frame(7, BROADCAST_PERIPHERAL_ID, b"42C").unwrap();
            harness
                .input
                .try_send(RadioInputMessage::DeliverFrame {
                    bytes: response.encode(),
                    rssi_dbm: -80,
                })
                .unwrap();
            harness.poller.step().await;
            assert!(harness.reports.try_receive().is_ok());

            // A relay double-delivers the same response before the next
            // request goes out.
            harness.poller.status = ControllerStatus::ListeningForResponse;
            harness
                .input
                .try_send(RadioInputMessage::DeliverFrame {
                    bytes: response.encode(),
                    rssi_dbm: -80,
                })
                .unwrap();
            harness.poller.step().await;

            assert_eq!(harness.poller.status, ControllerStatus::ListeningForResponse);
            assert!(harness.reports.try_receive().is_err());
            assert!(harness
                .drain_events()
                .contains(&ControllerEvent::DuplicateCycleDropped { cycle: 7 }));
        });
    }

    #[test]
    fn own_request_echo_is_suppressed() {
        block_on(async {
            let mut harness = harness(PollSchedule::broadcast_only());
            let request_bytes = harness.drive_to_listening().await;

            // A relay echoes the controller's own request straight back.
            harness
                .input
                .try_send(RadioInputMessage::DeliverFrame {
                    bytes: request_bytes,
                    rssi_dbm: -60,
                })
                .unwrap();
            harness.poller.step().await;

            assert_eq!(harness.poller.status, ControllerStatus::ListeningForResponse);
            assert!(harness.reports.try_receive().is_err());
            assert!(harness
                .drain_events()
                .contains(&ControllerEvent::DuplicateCycleDropped { cycle: 100 }));
        });
    }

    #[test]
    fn unrecognized_message_type_keeps_listening_but_adopts_the_cycle() {
        block_on(async {
            let mut harness = harness(PollSchedule::broadcast_only());
            harness.drive_to_listening().await;

            let unknown = Frame::new(42, 0x77, BROADCAST_PERIPHERAL_ID, &[]).unwrap();
            harness
                .input
                .try_send(RadioInputMessage::DeliverFrame {
                    bytes: unknown.encode(),
                    rssi_dbm: -70,
                })
                .unwrap();
            harness.poller.step().await;

            assert_eq!(harness.poller.status, ControllerStatus::ListeningForResponse);
            assert!(harness.reports.try_receive().is_err());
            assert!(harness
                .drain_events()
                .contains(&ControllerEvent::UnrecognizedMessageType { message_type: 0x77 }));

            // The cycle was adopted before type dispatch, so a replay of the
            // same frame now reads as a duplicate.
            assert!(!harness.poller.cycles.accept_if_new(42));
        });
    }

    #[test]
    fn malformed_report_keeps_listening() {
        block_on(async {
            let mut harness = harness(PollSchedule::broadcast_only());
            harness.drive_to_listening().await;

            let mut bytes = [0u8; crate::FRAME_SIZE];
            bytes[0] = 9;
            bytes[1] = MessageType::ResponseReport as u8;
            bytes[2] = BROADCAST_PERIPHERAL_ID;
            bytes[crate::report::REPORT_LENGTH_OFFSET] = (crate::report::SENSOR_TEXT_CAPACITY + 1) as u8;
            harness
                .input
                .try_send(RadioInputMessage::DeliverFrame { bytes, rssi_dbm: -70 })
                .unwrap();
            harness.poller.step().await;

            assert_eq!(harness.poller.status, ControllerStatus::ListeningForResponse);
            assert!(harness.reports.try_receive().is_err());
            assert!(harness.drain_events().contains(&ControllerEvent::MalformedReport { cycle: 9 }));
        });
    }

    #[test]
    fn transmit_failure_still_enters_listening() {
        block_on(async {
            let mut harness = harness(PollSchedule::broadcast_only());

            // Saturate the simulated radio's output queue so the transmit
            // attempt is rejected.
            while harness.output.try_send(RadioOutputMessage::SampleRssi).is_ok() {}
            harness.input.try_send(RadioInputMessage::RssiSample(-120)).unwrap();

            harness.poller.step().await; // Initializing -> Idle
            harness.poller.step().await; // Idle -> RequestingReport
            harness.poller.step().await; // request with failing transmit

            assert_eq!(harness.poller.status, ControllerStatus::ListeningForResponse);
            assert!(harness
                .drain_events()
                .contains(&ControllerEvent::TransmitFailed(RadioError::TransmitFailed)));
        });
    }

    #[test]
    fn round_robin_schedule_rotates_targets_across_polls() {
        block_on(async {
            let mut harness = harness(PollSchedule::from_ids(&[5, 6]).unwrap());
            let first_request = Frame::decode(&harness.drive_to_listening().await);
            assert_eq!(first_request.peripheral_id(), 5);

            let response = response_frame(7, 5, b"ok").unwrap();
            harness
                .input
                .try_send(RadioInputMessage::DeliverFrame {
                    bytes: response.encode(),
                    rssi_dbm: -80,
                })
                .unwrap();
            harness.poller.step().await;
            assert_eq!(harness.poller.status, ControllerStatus::RequestingReport);

            harness.input.try_send(RadioInputMessage::RssiSample(-120)).unwrap();
            harness.poller.step().await;

            let mut second_request = None;
            while let Ok(message) = harness.output.try_receive() {
                if let RadioOutputMessage::TransmitFrame(bytes) = message {
                    second_request = Some(Frame::decode(&bytes));
                }
            }
            assert_eq!(second_request.expect("no second request").peripheral_id(), 6);
        });
    }

    #[test]
    fn reserved_timeout_status_recovers_into_polling() {
        block_on(async {
            let mut harness = harness(PollSchedule::broadcast_only());
            harness.poller.status = ControllerStatus::ReportTimedOut;
            harness.poller.step().await;
            assert_eq!(harness.poller.status, ControllerStatus::RequestingReport);
        });
    }
}
