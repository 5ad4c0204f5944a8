// SPDX-License-Identifier: Apache-2.0

//! USB interrupt handler, plus the operator console it feeds through a static [`Mutex`].
use core::{cell::RefCell, fmt};

use critical_section::Mutex;
use rp2040_hal::{pac::interrupt, usb::UsbBus};
use usb_device::{
    device::{UsbDevice, UsbDeviceState},
    UsbError,
};
use usbd_serial::SerialPort;

use crate::command::{Console, InputQueue};

/// Received bytes buffered until the console reads them
const RX_QUEUE_LEN: usize = 256;
/// Attempts at a blocked write before the output is dropped
const WRITE_RETRIES: u32 = 100_000;

/// USB serial device for access in interrupts
pub static USB_SERIAL: Mutex<RefCell<Option<UsbSerial>>> = Mutex::new(RefCell::new(None));

/// USB CDC-ACM device and its receive queue
pub struct UsbSerial {
    /// USB device state machine
    device: UsbDevice<'static, UsbBus>,
    /// CDC-ACM class
    serial: SerialPort<'static, UsbBus>,
    /// Bytes received from the host, not yet read
    rx_queue: InputQueue<RX_QUEUE_LEN>,
}

impl UsbSerial {
    /// Wrap a built USB device and its serial class
    pub fn new(device: UsbDevice<'static, UsbBus>, serial: SerialPort<'static, UsbBus>) -> Self {
        Self {
            device,
            serial,
            rx_queue: InputQueue::new(),
        }
    }

    /// Service the USB device and move received bytes into the queue.
    ///
    /// The endpoint is always drained, even into a full queue. A packet left unread keeps the
    /// interrupt pending, so bytes that don't fit are dropped instead.
    fn poll(&mut self) {
        if !self.device.poll(&mut [&mut self.serial]) {
            return;
        }
        let mut buf = [0u8; 64];
        while let Ok(count @ 1..) = self.serial.read(&mut buf) {
            let dropped = self.rx_queue.extend_from_received(&buf[..count]);
            if dropped > 0 {
                warn!("Console input queue full, {} bytes dropped", dropped);
            }
        }
    }

    /// Write as much of `bytes` as the endpoint accepts. `None` when there is no host to write to.
    fn write(&mut self, bytes: &[u8]) -> Option<usize> {
        if self.device.state() != UsbDeviceState::Configured {
            return None;
        }
        match self.serial.write(bytes) {
            Ok(count) => Some(count),
            Err(UsbError::WouldBlock) => {
                self.poll();
                Some(0)
            }
            Err(_) => None,
        }
    }
}

/// Polls the USB device whenever the controller raises an event
#[interrupt]
fn USBCTRL_IRQ() {
    critical_section::with(|cs| {
        if let Some(usb) = USB_SERIAL.borrow_ref_mut(cs).as_mut() {
            usb.poll();
        }
    });
}

/// Operator console over [`USB_SERIAL`].
///
/// Output is dropped while no host is connected.
pub struct UsbConsole;

impl Console for UsbConsole {
    fn read_byte(&mut self) -> u8 {
        loop {
            let byte = critical_section::with(|cs| {
                USB_SERIAL
                    .borrow_ref_mut(cs)
                    .as_mut()
                    .and_then(|usb| usb.rx_queue.pop())
            });
            if let Some(byte) = byte {
                return byte;
            }
            core::hint::spin_loop();
        }
    }

    fn write_bytes(&mut self, mut bytes: &[u8]) -> fmt::Result {
        let mut retries = 0;
        while !bytes.is_empty() {
            let written = critical_section::with(|cs| {
                USB_SERIAL
                    .borrow_ref_mut(cs)
                    .as_mut()
                    .and_then(|usb| usb.write(bytes))
            });
            match written {
                Some(0) if retries < WRITE_RETRIES => retries += 1,
                Some(count) if count > 0 => {
                    bytes = &bytes[count..];
                    retries = 0;
                }
                _ => {
                    trace!("Console output dropped ({} bytes)", bytes.len());
                    break;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Write for UsbConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes())
    }
}
