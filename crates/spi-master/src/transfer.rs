//! Byte, word and buffer transfers.
//!
//! Every byte goes through the same cycle: load the data register, wait the
//! settle delay, poll the completion flag. Multi-byte words are sent and
//! received most significant byte first.
//!
//! The plain methods ([`Bus::write_word`], [`Bus::read_buffer`], ...) poll
//! without a bound: a transfer that never completes blocks forever. This is a
//! hardware contract, the peripheral always finishes a byte it was handed
//! while enabled. The `*_with` variants take explicit [`TransferOptions`] and
//! give up with [`BusError::TransferTimeout`] once `timeout` polls have seen
//! no completion.
//!
//! None of these select a device. They drive whatever is selected.

use core::convert::Infallible;

use crate::config::{Completion, TransferOptions};
use crate::controller::Bus;
use crate::critical::InterruptControl;
use crate::error::BusError;
use crate::regs::{ControlBit, RegisterAccess};

/// Word size for word transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Width {
    Bits8,
    Bits16,
    Bits24,
    Bits32,
}

impl Width {
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            8 => Some(Width::Bits8),
            16 => Some(Width::Bits16),
            24 => Some(Width::Bits24),
            32 => Some(Width::Bits32),
            _ => None,
        }
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.bytes() as u8 * 8
    }

    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Width::Bits8 => 1,
            Width::Bits16 => 2,
            Width::Bits24 => 3,
            Width::Bits32 => 4,
        }
    }

    /// The low `bytes()` bytes of `value`, most significant first. Higher
    /// bytes are ignored.
    pub fn be_bytes(self, value: u32) -> impl Iterator<Item = u8> {
        (0..self.bytes()).rev().map(move |i| (value >> (8 * i)) as u8)
    }
}

/// How to wait on the completion flag.
trait Wait {
    type Error;

    fn wait<R: RegisterAccess>(&mut self, regs: &mut R) -> Result<(), Self::Error>;
}

/// Poll until the flag rises, however long that takes.
struct Spin;

impl Wait for Spin {
    type Error = Infallible;

    #[inline]
    fn wait<R: RegisterAccess>(&mut self, regs: &mut R) -> Result<(), Infallible> {
        while !regs.bit_is_set(ControlBit::TransferComplete) {
            core::hint::spin_loop();
        }
        Ok(())
    }
}

/// Poll at most this many times.
struct Polls(u32);

impl Wait for Polls {
    type Error = BusError;

    fn wait<R: RegisterAccess>(&mut self, regs: &mut R) -> Result<(), BusError> {
        for _ in 0..self.0 {
            if regs.bit_is_set(ControlBit::TransferComplete) {
                return Ok(());
            }
        }

        #[cfg(feature = "defmt")]
        defmt::warn!("[spi] no completion after {} polls", self.0);

        Err(BusError::TransferTimeout)
    }
}

#[inline]
fn unwrap_infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

impl<R: RegisterAccess, I: InterruptControl> Bus<R, I> {
    // ---------------------------------------------------------------------
    // Blocking transfers
    // ---------------------------------------------------------------------

    /// Send the low `width` bits of `value`, most significant byte first.
    pub fn write_word(&mut self, width: Width, value: u32) {
        let completion = self.options.completion;
        unwrap_infallible(self.write_bytes(width.be_bytes(value), completion, &mut Spin))
    }

    /// Send `bytes` in order. An empty slice touches nothing.
    pub fn write_buffer(&mut self, bytes: &[u8]) {
        let completion = self.options.completion;
        unwrap_infallible(self.write_bytes(bytes.iter().copied(), completion, &mut Spin))
    }

    /// Like [`write_word`](Self::write_word) but returns as soon as the last
    /// byte is loaded. Earlier bytes of the word are still waited on.
    ///
    /// The next transfer, [`flush`](Self::flush) or
    /// [`deselect`](Self::deselect) waits for that byte first.
    pub fn write_word_no_wait(&mut self, width: Width, value: u32) {
        unwrap_infallible(self.write_bytes(
            width.be_bytes(value),
            Completion::FireAndForget,
            &mut Spin,
        ))
    }

    /// Buffer counterpart of [`write_word_no_wait`](Self::write_word_no_wait).
    pub fn write_buffer_no_wait(&mut self, bytes: &[u8]) {
        unwrap_infallible(self.write_bytes(
            bytes.iter().copied(),
            Completion::FireAndForget,
            &mut Spin,
        ))
    }

    /// Clock in `width` bits, sending the configured filler byte. The first
    /// byte received is the most significant.
    pub fn read_word(&mut self, width: Width) -> u32 {
        let filler = self.options.filler.byte();
        unwrap_infallible(self.read_word_in(width, filler, &mut Spin))
    }

    /// Fill `buf` with received bytes. An empty buffer touches nothing.
    pub fn read_buffer(&mut self, buf: &mut [u8]) {
        let filler = self.options.filler.byte();
        unwrap_infallible(self.read_into(buf, filler, &mut Spin))
    }

    /// Full duplex: send each byte of `buf` and replace it with the byte
    /// received during that cycle.
    pub fn transfer_in_place(&mut self, buf: &mut [u8]) {
        unwrap_infallible(self.exchange_in_place(buf, &mut Spin))
    }

    /// Wait for a byte left on the wire by a fire-and-forget write.
    pub fn flush(&mut self) {
        unwrap_infallible(self.drain(&mut Spin))
    }

    // ---------------------------------------------------------------------
    // Transfers with explicit options
    // ---------------------------------------------------------------------

    pub fn write_word_with(
        &mut self,
        width: Width,
        value: u32,
        options: TransferOptions,
    ) -> Result<(), BusError> {
        let bytes = width.be_bytes(value);
        match options.timeout {
            None => Ok(unwrap_infallible(self.write_bytes(
                bytes,
                options.completion,
                &mut Spin,
            ))),
            Some(polls) => {
                self.write_bytes(bytes, options.completion, &mut Polls(polls))
            }
        }
    }

    pub fn write_buffer_with(
        &mut self,
        bytes: &[u8],
        options: TransferOptions,
    ) -> Result<(), BusError> {
        let bytes = bytes.iter().copied();
        match options.timeout {
            None => Ok(unwrap_infallible(self.write_bytes(
                bytes,
                options.completion,
                &mut Spin,
            ))),
            Some(polls) => {
                self.write_bytes(bytes, options.completion, &mut Polls(polls))
            }
        }
    }

    pub fn read_word_with(
        &mut self,
        width: Width,
        options: TransferOptions,
    ) -> Result<u32, BusError> {
        let filler = options.filler.byte();
        match options.timeout {
            None => Ok(unwrap_infallible(self.read_word_in(width, filler, &mut Spin))),
            Some(polls) => self.read_word_in(width, filler, &mut Polls(polls)),
        }
    }

    pub fn read_buffer_with(
        &mut self,
        buf: &mut [u8],
        options: TransferOptions,
    ) -> Result<(), BusError> {
        let filler = options.filler.byte();
        match options.timeout {
            None => Ok(unwrap_infallible(self.read_into(buf, filler, &mut Spin))),
            Some(polls) => self.read_into(buf, filler, &mut Polls(polls)),
        }
    }

    pub fn transfer_in_place_with(
        &mut self,
        buf: &mut [u8],
        options: TransferOptions,
    ) -> Result<(), BusError> {
        match options.timeout {
            None => Ok(unwrap_infallible(self.exchange_in_place(buf, &mut Spin))),
            Some(polls) => self.exchange_in_place(buf, &mut Polls(polls)),
        }
    }

    /// Send `write` while receiving into `read`. The shorter side is padded:
    /// missing outgoing bytes are the filler, surplus incoming bytes are
    /// dropped.
    pub fn transfer_with(
        &mut self,
        read: &mut [u8],
        write: &[u8],
        options: TransferOptions,
    ) -> Result<(), BusError> {
        let filler = options.filler.byte();
        match options.timeout {
            None => Ok(unwrap_infallible(self.exchange(read, write, filler, &mut Spin))),
            Some(polls) => self.exchange(read, write, filler, &mut Polls(polls)),
        }
    }

    pub fn flush_with(&mut self, options: TransferOptions) -> Result<(), BusError> {
        match options.timeout {
            None => Ok(unwrap_infallible(self.drain(&mut Spin))),
            Some(polls) => self.drain(&mut Polls(polls)),
        }
    }

    // ---------------------------------------------------------------------
    // Byte cycle
    // ---------------------------------------------------------------------

    /// Wait out a byte left on the wire by a fire-and-forget write.
    fn drain<W: Wait>(&mut self, wait: &mut W) -> Result<(), W::Error> {
        if self.in_flight {
            wait.wait(&mut self.regs)?;
            self.in_flight = false;
        }
        Ok(())
    }

    /// One byte out, waiting for it to complete.
    #[inline]
    fn send<W: Wait>(&mut self, byte: u8, wait: &mut W) -> Result<(), W::Error> {
        self.regs.write_data(byte);
        self.regs.settle();
        wait.wait(&mut self.regs)?;
        self.in_flight = false;
        Ok(())
    }

    /// One byte out, one byte in.
    #[inline]
    fn shift<W: Wait>(&mut self, byte: u8, wait: &mut W) -> Result<u8, W::Error> {
        self.send(byte, wait)?;
        Ok(self.regs.read_data())
    }

    fn write_bytes<W: Wait>(
        &mut self,
        bytes: impl Iterator<Item = u8>,
        completion: Completion,
        wait: &mut W,
    ) -> Result<(), W::Error> {
        let mut bytes = bytes.peekable();
        if bytes.peek().is_some() {
            self.drain(wait)?;
        }
        while let Some(byte) = bytes.next() {
            if completion == Completion::FireAndForget && bytes.peek().is_none() {
                self.regs.write_data(byte);
                self.in_flight = true;
            } else {
                self.send(byte, wait)?;
            }
        }
        Ok(())
    }

    fn read_word_in<W: Wait>(
        &mut self,
        width: Width,
        filler: u8,
        wait: &mut W,
    ) -> Result<u32, W::Error> {
        self.drain(wait)?;
        let mut word = 0u32;
        for _ in 0..width.bytes() {
            word = (word << 8) | u32::from(self.shift(filler, wait)?);
        }
        Ok(word)
    }

    fn read_into<W: Wait>(
        &mut self,
        buf: &mut [u8],
        filler: u8,
        wait: &mut W,
    ) -> Result<(), W::Error> {
        if !buf.is_empty() {
            self.drain(wait)?;
        }
        for byte in buf.iter_mut() {
            *byte = self.shift(filler, wait)?;
        }
        Ok(())
    }

    fn exchange_in_place<W: Wait>(
        &mut self,
        buf: &mut [u8],
        wait: &mut W,
    ) -> Result<(), W::Error> {
        if !buf.is_empty() {
            self.drain(wait)?;
        }
        for byte in buf.iter_mut() {
            *byte = self.shift(*byte, wait)?;
        }
        Ok(())
    }

    fn exchange<W: Wait>(
        &mut self,
        read: &mut [u8],
        write: &[u8],
        filler: u8,
        wait: &mut W,
    ) -> Result<(), W::Error> {
        let len = read.len().max(write.len());
        if len > 0 {
            self.drain(wait)?;
        }
        for i in 0..len {
            let out = write.get(i).copied().unwrap_or(filler);
            let received = self.shift(out, wait)?;
            if let Some(slot) = read.get_mut(i) {
                *slot = received;
            }
        }
        Ok(())
    }
}
