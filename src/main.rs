//! Firmware for the binned PMT pulse counter.
#![no_std]
#![no_main]
#![warn(missing_docs)]

use core::fmt::Write;

use cortex_m::singleton;
use defmt::{error, info};
#[allow(unused_imports)]
use defmt_rtt as _;
#[allow(unused_imports)]
use panic_probe as _;
use pmt_counter::{
    buffer::BufferPool,
    components::PmtFrontEnd,
    config::{RunSettings, CAPTURE_POOL_WORDS},
    controller::RunController,
    interrupt::{UsbConsole, UsbSerial, USB_SERIAL},
};
use rp2040_hal::{
    clocks::init_clocks_and_plls, dma::DMAExt, entry, gpio::Pins, pac, usb::UsbBus, Sio, Timer,
    Watchdog,
};
use usb_device::{
    bus::UsbBusAllocator,
    device::{StringDescriptors, UsbDeviceBuilder, UsbVidPid},
};
use usbd_serial::SerialPort;

/// Second-stage bootloader, from [rp2040-boot2](https://docs.rs/rp2040-boot2)
#[link_section = ".boot2"]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
/// External high-speed crystal on the pico board is 12Mhz
pub const XOSC_FREQ_HZ: u32 = 12_000_000;

/// Acquisition loop
#[entry]
fn main() -> ! {
    // Zero-initialized in .bss, too large to build on the stack
    static mut CAPTURE_WORDS: [u32; CAPTURE_POOL_WORDS] = [0; CAPTURE_POOL_WORDS];

    info!("PMT counter startup");
    let mut pac = pac::Peripherals::take().unwrap();
    let mut watchdog = Watchdog::new(pac.WATCHDOG);
    let sio = Sio::new(pac.SIO);

    let clocks = init_clocks_and_plls(
        XOSC_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok()
    .unwrap();
    let timer = Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);

    // Setup USB console
    let usb_bus: &'static UsbBusAllocator<UsbBus> = singleton!(: UsbBusAllocator<UsbBus> =
        UsbBusAllocator::new(UsbBus::new(
            pac.USBCTRL_REGS,
            pac.USBCTRL_DPRAM,
            clocks.usb_clock,
            true,
            &mut pac.RESETS,
        )))
    .unwrap();
    let serial = SerialPort::new(usb_bus);
    let device = UsbDeviceBuilder::new(usb_bus, UsbVidPid(0x16c0, 0x27dd))
        .strings(&[StringDescriptors::default()
            .manufacturer("PMT counter")
            .product("PMT counter")
            .serial_number("PMT0")])
        .unwrap()
        .device_class(usbd_serial::USB_CLASS_CDC)
        .build();
    defmt::debug!("critical_section: init USB serial");
    critical_section::with(|cs| USB_SERIAL.replace(cs, Some(UsbSerial::new(device, serial))));
    unsafe { pac::NVIC::unmask(pac::Interrupt::USBCTRL_IRQ) }

    // DMA has priority over the cores so the capture never stalls the FIFO
    pac.BUSCTRL
        .bus_priority()
        .write(|w| w.dma_r().set_bit().dma_w().set_bit());

    // Setup counter front-end
    let pins = Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );
    let dma = pac.DMA.split(&mut pac.RESETS);
    let front_end = PmtFrontEnd::init(pac.PIO0, dma.ch0, timer, pins, &mut pac.RESETS).unwrap();

    let mut controller = RunController::new(
        UsbConsole,
        front_end,
        BufferPool::new(CAPTURE_WORDS),
        RunSettings::default(),
    );
    if let Err(err) = controller.run() {
        error!("Acquisition halted: {}", err);
        let _ = write!(controller.console(), "ERR: {}\r\n", err);
    }
    loop {
        cortex_m::asm::wfi();
    }
}
