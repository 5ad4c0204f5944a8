// SPDX-License-Identifier: Apache-2.0

//! Board components: the PIO counting program, its DMA capture channel and the pins they drive.
use embedded_hal::{
    delay::DelayNs,
    digital::{OutputPin, PinState},
};
use pio::{
    Assembler, InSource, Instruction, InstructionOperands, JmpCondition, MovDestination,
    MovOperation, MovSource, SetDestination, WaitSource, RP2040_MAX_PROGRAM_SIZE,
};
#[cfg(feature = "activity_led")]
use rp2040_hal::gpio::bank0::Gpio25;
use rp2040_hal::{
    dma::{single_buffer, Channel, ChannelIndex, CH0},
    gpio::{bank0::Gpio10, FunctionPio0, FunctionSio, Pin, Pins, PullDown, SioOutput},
    pac,
    pio::{
        InstallError, PIOBuilder, PIOExt, PinDir, Running, Rx, ShiftDirection, StateMachine,
        Stopped, Tx, PIO, SM0,
    },
    Timer,
};

use crate::{
    buffer::CaptureBuffer,
    capture::CounterFrontEnd,
    config::LANE_COUNT,
    geometry,
};

/// First counter output pin; the counter's 8 outputs are on GPIO0-7
pub const LANE_PIN_BASE: u8 = 0;
/// Latch output enable (active low)
pub const OE_PIN: u8 = 10;
/// First of the five counter control pins driven by the PIO `set` instruction:
/// LE (GPIO11), CE (GPIO12), TLCD (GPIO13), PE (GPIO14), MR (GPIO15)
pub const CTRL_PIN_BASE: u8 = 11;
/// Number of counter control pins
pub const CTRL_PIN_COUNT: u8 = 5;
/// External trigger input that starts the capture window
pub const TRIGGER_PIN: u8 = 16;
/// Trigger level that starts the capture
pub const TRIGGER_ACTIVE_HIGH: bool = true;
/// Integer PIO clock divisor. 1 runs the counting program at the full system clock.
pub const CLOCK_DIVISOR: u16 = 1;
/// Time for the counter board to power up before the latch outputs are enabled
pub const BOARD_SETTLE_MS: u32 = 1000;

/// Control pin levels between bins: parallel load (PE, active low) held off, counting enabled
const CTRL_IDLE: u8 = 0b01000;
/// Latch the counter outputs (LE high)
const CTRL_LATCH: u8 = CTRL_IDLE | 0b00001;
/// Clear the counter (MR high) while the latch holds the last bin
const CTRL_RESET: u8 = CTRL_IDLE | 0b10000;

/// PIO block and state machine running the counting program
type CounterSm = (pac::PIO0, SM0);
/// DMA capture of the counting program's RX FIFO
pub type CounterTransfer = single_buffer::Transfer<Channel<CH0>, Rx<CounterSm>, CaptureBuffer>;

/// Build the counting program.
///
/// The program pulls the bin time once, waits for the trigger, then loops forever: integrate for
/// `bin_time` cycles, latch the counter, reset it, and shift the latched outputs into the ISR.
/// The ISR autopushes a transfer word every [`geometry::bits_per_transfer_word`] bits.
pub fn counter_program(
    trigger_pin: u8,
    trigger_active_high: bool,
) -> pio::Program<RP2040_MAX_PROGRAM_SIZE> {
    let mut a = Assembler::<RP2040_MAX_PROGRAM_SIZE>::new();
    let mut wrap_source = a.label();
    let mut wrap_target = a.label();
    let mut integrate = a.label();

    a.pull(false, true);
    a.mov(MovDestination::Y, MovOperation::None, MovSource::OSR);
    a.wait(
        u8::from(trigger_active_high),
        WaitSource::GPIO,
        trigger_pin,
        false,
    );
    a.bind(&mut wrap_target);
    a.mov(MovDestination::X, MovOperation::None, MovSource::Y);
    a.bind(&mut integrate);
    a.jmp(JmpCondition::XDecNonZero, &mut integrate);
    a.set(SetDestination::PINS, CTRL_LATCH);
    a.set(SetDestination::PINS, CTRL_RESET);
    a.r#in(InSource::PINS, LANE_COUNT as u8);
    a.set(SetDestination::PINS, CTRL_IDLE);
    a.bind(&mut wrap_source);
    a.assemble_with_wrap(wrap_source, wrap_target)
}

/// The counting state machine in either of its run states
enum Counter {
    /// Stopped, can be reconfigured
    Stopped(StateMachine<CounterSm, Stopped>),
    /// Counting
    Running(StateMachine<CounterSm, Running>),
}

/// Counter front-end on PIO0 SM0 and DMA channel 0.
pub struct PmtFrontEnd {
    /// Owns the PIO block the program is installed in
    _pio: PIO<pac::PIO0>,
    /// Counting state machine. Only `None` mid-transition.
    counter: Option<Counter>,
    /// RX FIFO, lent to the DMA channel during a transfer
    rx: Option<Rx<CounterSm>>,
    /// TX FIFO, used to load the bin time
    tx: Tx<CounterSm>,
    /// DMA channel, lent to the transfer
    dma: Option<Channel<CH0>>,
    /// Instruction memory offset of the counting program
    program_offset: u8,
    /// Timebase for capture deadlines
    timer: Timer,
    /// Latch output enable
    _output_enable: Pin<Gpio10, FunctionSio<SioOutput>, PullDown>,
    /// Lit while the counter runs
    #[cfg(feature = "activity_led")]
    activity_led: Pin<Gpio25, FunctionSio<SioOutput>, PullDown>,
}

impl PmtFrontEnd {
    /// Panic message raised if a transfer starts while another still owns the DMA channel
    pub const TRANSFER_BUSY_PANIC_MSG: &'static str =
        "DMA channel or RX FIFO is still owned by a previous transfer";

    /// Configure the counter pins, install the counting program and enable the latch outputs.
    ///
    /// Blocks for [`BOARD_SETTLE_MS`] while the counter board powers up.
    pub fn init(
        pio0: pac::PIO0,
        dma: Channel<CH0>,
        timer: Timer,
        pins: Pins,
        resets: &mut pac::RESETS,
    ) -> Result<Self, InstallError> {
        // Outputs stay high impedance until the board is ready
        let mut output_enable = pins.gpio10.into_push_pull_output_in_state(PinState::High);

        pins.gpio0.into_function::<FunctionPio0>();
        pins.gpio1.into_function::<FunctionPio0>();
        pins.gpio2.into_function::<FunctionPio0>();
        pins.gpio3.into_function::<FunctionPio0>();
        pins.gpio4.into_function::<FunctionPio0>();
        pins.gpio5.into_function::<FunctionPio0>();
        pins.gpio6.into_function::<FunctionPio0>();
        pins.gpio7.into_function::<FunctionPio0>();
        pins.gpio11.into_function::<FunctionPio0>();
        pins.gpio12.into_function::<FunctionPio0>();
        pins.gpio13.into_function::<FunctionPio0>();
        pins.gpio14.into_function::<FunctionPio0>();
        pins.gpio15.into_function::<FunctionPio0>();
        if TRIGGER_ACTIVE_HIGH {
            pins.gpio16.into_pull_down_input();
        } else {
            pins.gpio16.into_pull_up_input();
        }

        let (mut pio, sm0, _, _, _) = pio0.split(resets);
        let installed = pio.install(&counter_program(TRIGGER_PIN, TRIGGER_ACTIVE_HIGH))?;
        let program_offset = installed.offset();
        let (mut sm, rx, tx) = PIOBuilder::from_installed_program(installed)
            .in_pin_base(LANE_PIN_BASE)
            .set_pins(CTRL_PIN_BASE, CTRL_PIN_COUNT)
            .in_shift_direction(ShiftDirection::Right)
            .autopush(true)
            .push_threshold(geometry::bits_per_transfer_word(LANE_COUNT) as u8)
            .clock_divisor_fixed_point(CLOCK_DIVISOR, 0)
            .build(sm0);
        sm.set_pindirs(
            (CTRL_PIN_BASE..CTRL_PIN_BASE + CTRL_PIN_COUNT).map(|pin| (pin, PinDir::Output)),
        );
        debug!("Counting program installed at offset {}", program_offset);

        let mut delay = timer;
        delay.delay_ms(BOARD_SETTLE_MS);
        output_enable.set_low().ok();
        info!("Counter board ready");

        Ok(Self {
            _pio: pio,
            counter: Some(Counter::Stopped(sm)),
            rx: Some(rx),
            tx,
            dma: Some(dma),
            program_offset,
            timer,
            _output_enable: output_enable,
            #[cfg(feature = "activity_led")]
            activity_led: pins.gpio25.into_push_pull_output_in_state(PinState::Low),
        })
    }

    /// Run `instruction` immediately on the stopped state machine
    fn exec_stopped(&mut self, instruction: InstructionOperands) {
        match &mut self.counter {
            Some(Counter::Stopped(sm)) => sm.exec_instruction(Instruction {
                operands: instruction,
                delay: 0,
                side_set: None,
            }),
            _ => warn!("Counter must be stopped before it is reconfigured"),
        }
    }
}

impl CounterFrontEnd for PmtFrontEnd {
    type Transfer = CounterTransfer;

    fn disable_counter(&mut self) {
        self.counter = match self.counter.take() {
            Some(Counter::Running(sm)) => {
                trace!("Counter disabled");
                Some(Counter::Stopped(sm.stop()))
            }
            other => other,
        };
        #[cfg(feature = "activity_led")]
        self.activity_led.set_low().ok();
    }

    fn clear_counter(&mut self) {
        if let Some(Counter::Stopped(sm)) = &mut self.counter {
            sm.clear_fifos();
        }
        self.exec_stopped(InstructionOperands::SET {
            destination: SetDestination::PINS,
            data: CTRL_IDLE,
        });
        trace!("Counter FIFOs cleared");
    }

    fn reset_shift_counters(&mut self) {
        // A MOV into ISR/OSR also zeroes its shift count
        for destination in [MovDestination::ISR, MovDestination::OSR] {
            self.exec_stopped(InstructionOperands::MOV {
                destination,
                op: MovOperation::None,
                source: MovSource::NULL,
            });
        }
        trace!("Counter shift counters reset");
    }

    fn arm_counter_program(&mut self, bin_time: u32) {
        self.exec_stopped(InstructionOperands::JMP {
            condition: JmpCondition::Always,
            address: self.program_offset,
        });
        if !self.tx.write(bin_time) {
            warn!("TX FIFO full, bin time not loaded");
        }
        trace!("Counting program armed with bin time {}", bin_time);
    }

    fn start_transfer(&mut self, buffer: CaptureBuffer) -> CounterTransfer {
        let channel = self.dma.take().expect(Self::TRANSFER_BUSY_PANIC_MSG);
        let rx = self.rx.take().expect(Self::TRANSFER_BUSY_PANIC_MSG);
        single_buffer::Config::new(channel, rx, buffer).start()
    }

    fn enable_counter(&mut self) {
        self.counter = match self.counter.take() {
            Some(Counter::Stopped(sm)) => {
                trace!("Counter enabled");
                Some(Counter::Running(sm.start()))
            }
            other => other,
        };
        #[cfg(feature = "activity_led")]
        self.activity_led.set_high().ok();
    }

    fn transfer_complete(&self, transfer: &CounterTransfer) -> bool {
        transfer.is_done()
    }

    fn finish_transfer(&mut self, transfer: CounterTransfer) -> CaptureBuffer {
        let (channel, rx, buffer) = transfer.wait();
        self.dma = Some(channel);
        self.rx = Some(rx);
        buffer
    }

    fn abort_transfer(&mut self, transfer: CounterTransfer) -> CaptureBuffer {
        let mask = 1u32 << CH0::id();
        // SAFETY: CHAN_ABORT only affects the channels whose bits are written, and this front-end
        // owns CH0 through `transfer`
        let dma = unsafe { &*pac::DMA::ptr() };
        dma.chan_abort().write(|w| unsafe { w.bits(mask) });
        while dma.chan_abort().read().bits() & mask != 0 {
            core::hint::spin_loop();
        }
        trace!("DMA channel aborted");
        // The channel is no longer busy, so this returns immediately
        let (channel, rx, buffer) = transfer.wait();
        self.dma = Some(channel);
        self.rx = Some(rx);
        buffer
    }

    fn now_micros(&self) -> u64 {
        self.timer.get_counter().ticks()
    }
}
