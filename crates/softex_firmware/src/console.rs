//! UART console and `log` backend.
//!
//! Writes go byte by byte to the platform UART's transmit register. A
//! spinlock keeps lines from interleaving when output comes from both the
//! main flow and the panic handler.

use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{LevelFilter, Log, Metadata, Record};
use softex_common::mmio::UART_BASE;

/// Busy-waiting lock for no_std code.
pub struct SpinLock<T> {
    lock: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            lock: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while self
            .lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        SpinLockGuard {
            lock: &self.lock,
            data: &self.data,
        }
    }
}

/// Releases the lock on drop.
pub struct SpinLockGuard<'a, T> {
    lock: &'a AtomicBool,
    data: &'a UnsafeCell<T>,
}

impl<T> core::ops::Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.data.get() }
    }
}

impl<T> core::ops::DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.store(false, Ordering::Release);
    }
}

static CONSOLE: SpinLock<Uart> = SpinLock::new(Uart);

/// Transmit side of the console UART.
pub struct Uart;

impl fmt::Write for Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let tx = UART_BASE as *mut u8;
        for c in s.bytes() {
            unsafe {
                if c == b'\n' {
                    tx.write_volatile(b'\r');
                }
                tx.write_volatile(c);
            }
        }
        Ok(())
    }
}

struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            _print(format_args!("[{:<5}] {}\n", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Installs the console as the `log` backend.
pub fn init(level: LevelFilter) {
    // Only fails if a logger is already installed, which keeps that one.
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Prints a line to the console.
macro_rules! println {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!("{}\n", format_args!($($arg)*)))
    };
}
pub(crate) use println;
