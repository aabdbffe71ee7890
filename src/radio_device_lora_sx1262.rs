//! # LoRa SX1262 Radio Device - Hardware Transceiver for the Poll Controller
//!
//! Hardware implementation of the radio device consumed by the polling state
//! machine, built on the Semtech SX1262 LoRa transceiver with the Embassy
//! framework on RP2040-class boards.
//!
//! ## Key Components
//!
//! - **RadioDevice**: state-based device handle
//!   - `NotInited` until `initialize()` succeeds; every operation on an
//!     uninitialized device fails with `RadioError::NotInitialized`
//!   - `Inited` holds the LoRa PHY instance and the prepared modulation and
//!     packet parameters
//!
//! - **RadioTuning**: opaque tuning bundle (frequency, bandwidth, spreading
//!   factor, coding rate, preamble length, output power, TCXO control) passed
//!   through to the PHY; the polling core never interprets these values
//!
//! - **SPI Communication**: exclusive-device SPI with DMA, busy-pin
//!   monitoring and control pins (RESET, DIO1, BUSY) as required by the chip
//!
//! ## Channel Sensing
//!
//! The PHY layer exposes Channel Activity Detection rather than a raw
//! wideband RSSI read, so `sample_rssi()` maps the CAD verdict onto the two
//! RSSI extremes: a busy channel reads well above any practical sense
//! threshold, a clear channel reads at the noise floor. The receipt-time RSSI
//! attached to received frames is the real per-packet reading reported by the
//! PHY.
//!
//! ## Design Considerations
//!
//! - Frame size is fixed at compile time (FRAME_SIZE); received packets of
//!   any other length are dropped as receive failures
//! - Receive and transmit are bounded by timeouts so the polling loop's
//!   self-looping listen state works as specified
//! - The nominal on-air data rate is derived from the tuning parameters at
//!   initialization and reported for diagnostics only

use embassy_futures::select::{select, Either};
use embassy_rp::gpio::AnyPin;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::spi::{Config, Spi};
use embassy_rp::Peri;
use embassy_time::Delay;
use embassy_time::{Duration, Timer};
use embedded_hal_bus::spi::ExclusiveDevice;
use lora_phy::iv::GenericSx126xInterfaceVariant;
use lora_phy::sx126x::TcxoCtrlVoltage;
use lora_phy::sx126x::{Sx1262, Sx126x};
use lora_phy::LoRa;
use lora_phy::{mod_params::*, sx126x};

use crate::RadioError;
use crate::ReceivedFrame;
use crate::FRAME_SIZE;

/// CAD operation timeout in milliseconds.
const CAD_TIMEOUT_MS: u64 = 1000;

/// Transmit operation timeout in milliseconds.
const TX_TIMEOUT_MS: u64 = 5000;

/// RSSI reported when CAD detects channel activity.
///
/// Well above any practical sense threshold, so the sense gate always holds
/// the transmission back.
const CAD_BUSY_RSSI_DBM: i16 = -40;

/// RSSI reported when CAD detects no channel activity.
const CAD_CLEAR_RSSI_DBM: i16 = -127;

/// Radio device initialization errors.
///
/// More granular than the runtime `RadioError` taxonomy; each variant names
/// the PHY bring-up step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioDeviceInitError {
    /// Failed to create the SX126x interface variant
    InterfaceError,
    /// Failed to initialize the LoRa PHY layer
    LoraError,
    /// Failed to create modulation parameters
    ModulationParamsError,
    /// Failed to create TX packet parameters
    TXPacketParamsError,
    /// Failed to create RX packet parameters
    RXPacketParamsError,
}

#[cfg(feature = "std")]
impl std::fmt::Display for RadioDeviceInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RadioDeviceInitError::InterfaceError => write!(f, "failed to create SX126x interface variant"),
            RadioDeviceInitError::LoraError => write!(f, "failed to initialize LoRa PHY layer"),
            RadioDeviceInitError::ModulationParamsError => write!(f, "failed to create modulation parameters"),
            RadioDeviceInitError::TXPacketParamsError => write!(f, "failed to create TX packet parameters"),
            RadioDeviceInitError::RXPacketParamsError => write!(f, "failed to create RX packet parameters"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RadioDeviceInitError {}

/// Opaque radio tuning bundle.
///
/// Pass-through values handed to the PHY; the polling core attaches no
/// meaning to any of them.
pub struct RadioTuning {
    pub frequency_hz: u32,
    pub bandwidth: Bandwidth,
    pub spreading_factor: SpreadingFactor,
    pub coding_rate: CodingRate,
    pub preamble_length: u16,
    pub output_power_dbm: i32,
    pub tcxo_ctrl: Option<TcxoCtrlVoltage>,
}

/// Nominal LoRa on-air data rate in bits per second for the given tuning.
fn nominal_data_rate_bps(tuning: &RadioTuning) -> u32 {
    let sf: u32 = match tuning.spreading_factor {
        SpreadingFactor::_5 => 5,
        SpreadingFactor::_6 => 6,
        SpreadingFactor::_7 => 7,
        SpreadingFactor::_8 => 8,
        SpreadingFactor::_9 => 9,
        SpreadingFactor::_10 => 10,
        SpreadingFactor::_11 => 11,
        SpreadingFactor::_12 => 12,
    };
    let bandwidth_hz: u32 = match tuning.bandwidth {
        Bandwidth::_7KHz => 7_810,
        Bandwidth::_10KHz => 10_420,
        Bandwidth::_15KHz => 15_630,
        Bandwidth::_20KHz => 20_830,
        Bandwidth::_31KHz => 31_250,
        Bandwidth::_41KHz => 41_670,
        Bandwidth::_62KHz => 62_500,
        Bandwidth::_125KHz => 125_000,
        Bandwidth::_250KHz => 250_000,
        Bandwidth::_500KHz => 500_000,
    };
    let (code_num, code_den): (u32, u32) = match tuning.coding_rate {
        CodingRate::_4_5 => (4, 5),
        CodingRate::_4_6 => (4, 6),
        CodingRate::_4_7 => (4, 7),
        CodingRate::_4_8 => (4, 8),
    };
    sf * bandwidth_hz / (1u32 << sf) * code_num / code_den
}

enum RadioDeviceState {
    NotInited,
    Inited {
        /// Optional transmit enable pin for PA control
        transmit_enable: Option<Output<'static>>,
        /// LoRa PHY instance with SX1262 configuration
        lora: LoRa<
            Sx126x<
                ExclusiveDevice<Spi<'static, embassy_rp::peripherals::SPI1, embassy_rp::spi::Async>, Output<'static>, Delay>,
                GenericSx126xInterfaceVariant<Output<'static>, Input<'static>>,
                Sx1262,
            >,
            Delay,
        >,
        mdltn_params: ModulationParams,
        tx_pkt_params: PacketParams,
        rx_pkt_params: PacketParams,
        output_power_dbm: i32,
        data_rate_bps: u32,
    },
}

/// SX1262 radio device handle owned by the polling task.
pub struct RadioDevice {
    state: RadioDeviceState,
    receive_buffer: [u8; FRAME_SIZE],
}

impl RadioDevice {
    pub const fn new() -> Self {
        RadioDevice {
            state: RadioDeviceState::NotInited,
            receive_buffer: [0u8; FRAME_SIZE],
        }
    }

    /// Initialize the radio with hardware resources and tuning.
    ///
    /// Configures the SPI interface, GPIO pins and LoRa PHY parameters. Must
    /// succeed before the device is handed to the controller; the polling
    /// state machine treats an uninitialized radio as a fatal condition.
    pub async fn initialize(
        &mut self,
        spi_nss_pin: Peri<'static, AnyPin>,
        reset_pin: Peri<'static, AnyPin>,
        dio1_pin: Peri<'static, AnyPin>,
        busy_pin: Peri<'static, AnyPin>,
        transmit_pin_option: Option<Peri<'static, AnyPin>>,
        spi: Peri<'static, embassy_rp::peripherals::SPI1>,
        clk_pin: Peri<'static, impl embassy_rp::spi::ClkPin<embassy_rp::peripherals::SPI1>>,
        mosi_pin: Peri<'static, impl embassy_rp::spi::MosiPin<embassy_rp::peripherals::SPI1>>,
        miso_pin: Peri<'static, impl embassy_rp::spi::MisoPin<embassy_rp::peripherals::SPI1>>,
        tx_dma: Peri<'static, embassy_rp::dma::AnyChannel>,
        rx_dma: Peri<'static, embassy_rp::dma::AnyChannel>,
        tuning: RadioTuning,
    ) -> Result<(), RadioDeviceInitError> {
        let data_rate_bps = nominal_data_rate_bps(&tuning);

        let spi_nss = Output::new(spi_nss_pin, Level::High);
        let reset = Output::new(reset_pin, Level::High);
        let dio1 = Input::new(dio1_pin, Pull::None);
        let busy = Input::new(busy_pin, Pull::None);
        let transmit_enable = transmit_pin_option.map(|transmit_pin| Output::new(transmit_pin, Level::High));

        let spi = Spi::new(spi, clk_pin, mosi_pin, miso_pin, tx_dma, rx_dma, Config::default());
        let spi_device = match ExclusiveDevice::new(spi, spi_nss, Delay) {
            Ok(device) => device,
            Err(_err) => {
                return Err(RadioDeviceInitError::InterfaceError);
            }
        };

        let config = sx126x::Config {
            chip: Sx1262,
            tcxo_ctrl: tuning.tcxo_ctrl,
            use_dcdc: true,
            rx_boost: false,
        };
        let iv = match GenericSx126xInterfaceVariant::new(reset, dio1, busy, None, None) {
            Ok(interface) => interface,
            Err(_err) => {
                return Err(RadioDeviceInitError::InterfaceError);
            }
        };

        let mut lora = match LoRa::new(Sx126x::new(spi_device, iv, config), false, Delay).await {
            Ok(lora_instance) => lora_instance,
            Err(_err) => {
                return Err(RadioDeviceInitError::LoraError);
            }
        };

        let mdltn_params = match lora.create_modulation_params(tuning.spreading_factor, tuning.bandwidth, tuning.coding_rate, tuning.frequency_hz) {
            Ok(mp) => mp,
            Err(_err) => {
                return Err(RadioDeviceInitError::ModulationParamsError);
            }
        };

        let tx_pkt_params = match lora.create_tx_packet_params(tuning.preamble_length, false, true, false, &mdltn_params) {
            Ok(pp) => pp,
            Err(_err) => {
                return Err(RadioDeviceInitError::TXPacketParamsError);
            }
        };

        let rx_pkt_params = match lora.create_rx_packet_params(tuning.preamble_length, false, FRAME_SIZE as u8, true, false, &mdltn_params) {
            Ok(pp) => pp,
            Err(_err) => {
                return Err(RadioDeviceInitError::RXPacketParamsError);
            }
        };

        self.state = RadioDeviceState::Inited {
            transmit_enable,
            lora,
            mdltn_params,
            tx_pkt_params,
            rx_pkt_params,
            output_power_dbm: tuning.output_power_dbm,
            data_rate_bps,
        };

        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, RadioDeviceState::Inited { .. })
    }

    /// Transmit one frame.
    ///
    /// The transmit enable pin (if configured) is managed around the
    /// transmission. Bounded by `TX_TIMEOUT_MS`.
    pub(crate) async fn transmit(&mut self, bytes: &[u8; FRAME_SIZE]) -> Result<(), RadioError> {
        match &mut self.state {
            RadioDeviceState::NotInited => Err(RadioError::NotInitialized),
            RadioDeviceState::Inited {
                transmit_enable,
                lora,
                mdltn_params,
                tx_pkt_params,
                output_power_dbm,
                ..
            } => {
                transmit_enable.as_mut().map(|te| te.set_low());

                if lora.prepare_for_tx(mdltn_params, tx_pkt_params, *output_power_dbm, bytes).await.is_err() {
                    transmit_enable.as_mut().map(|te| te.set_high());
                    return Err(RadioError::TransmitFailed);
                }

                let result = match select(lora.tx(), Timer::after(Duration::from_millis(TX_TIMEOUT_MS))).await {
                    Either::First(Ok(())) => Ok(()),
                    Either::First(Err(_err)) => Err(RadioError::TransmitFailed),
                    Either::Second(_) => Err(RadioError::TxTimeout),
                };
                transmit_enable.as_mut().map(|te| te.set_high());
                result
            }
        }
    }

    /// Listen for one frame, bounded by `timeout`.
    ///
    /// Frames whose length differs from `FRAME_SIZE` are dropped as receive
    /// failures; the CRC configured in the packet parameters is checked by the
    /// chip, which reports bad packets as receive errors.
    pub(crate) async fn receive(&mut self, timeout: Duration) -> Result<ReceivedFrame, RadioError> {
        let RadioDevice { state, receive_buffer } = self;
        match state {
            RadioDeviceState::NotInited => Err(RadioError::NotInitialized),
            RadioDeviceState::Inited {
                lora,
                mdltn_params,
                rx_pkt_params,
                ..
            } => {
                if lora.prepare_for_rx(RxMode::Continuous, mdltn_params, rx_pkt_params).await.is_err() {
                    return Err(RadioError::ReceiveFailed);
                }
                match select(lora.rx(rx_pkt_params, receive_buffer), Timer::after(timeout)).await {
                    Either::First(Ok((rx_len, packet_status))) => {
                        if rx_len as usize != FRAME_SIZE {
                            log::debug!("dropping packet with unexpected length {}", rx_len);
                            return Err(RadioError::ReceiveFailed);
                        }
                        let mut bytes = [0u8; FRAME_SIZE];
                        bytes.copy_from_slice(&receive_buffer[..FRAME_SIZE]);
                        Ok(ReceivedFrame {
                            bytes,
                            rssi_dbm: packet_status.rssi,
                        })
                    }
                    Either::First(Err(_err)) => Err(RadioError::ReceiveFailed),
                    Either::Second(_) => Err(RadioError::RxTimeout),
                }
            }
        }
    }

    /// Sample the channel for the sense gate.
    ///
    /// Maps the CAD verdict onto the two RSSI extremes (see module docs).
    /// Bounded by `CAD_TIMEOUT_MS`; a timed-out or failed CAD is a sampling
    /// failure, which the sense gate treats as a busy channel.
    pub(crate) async fn sample_rssi(&mut self) -> Result<i16, RadioError> {
        match &mut self.state {
            RadioDeviceState::NotInited => Err(RadioError::NotInitialized),
            RadioDeviceState::Inited { lora, mdltn_params, .. } => {
                if lora.prepare_for_cad(mdltn_params).await.is_err() {
                    return Err(RadioError::SenseFailed);
                }
                match select(lora.cad(mdltn_params), Timer::after(Duration::from_millis(CAD_TIMEOUT_MS))).await {
                    Either::First(Ok(true)) => Ok(CAD_BUSY_RSSI_DBM),
                    Either::First(Ok(false)) => Ok(CAD_CLEAR_RSSI_DBM),
                    Either::First(Err(_err)) => Err(RadioError::SenseFailed),
                    Either::Second(_) => Err(RadioError::SenseFailed),
                }
            }
        }
    }

    /// Nominal on-air data rate, for diagnostics only.
    pub(crate) fn data_rate_bps(&self) -> u32 {
        match &self.state {
            RadioDeviceState::NotInited => 0,
            RadioDeviceState::Inited { data_rate_bps, .. } => *data_rate_bps,
        }
    }
}
