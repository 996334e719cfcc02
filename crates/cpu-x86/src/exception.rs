//! Guest exceptions and the step-level error type.
//!
//! Guest CPU exceptions (architectural, vectors 0..14) are plain data and
//! travel as `Result` errors through the execution pipeline; the step loop
//! converts them back into interrupt dispatch. Host runtime errors are a
//! separate variant and are never converted into a guest exception — the
//! two domains stay strictly apart so implementation bugs can't masquerade
//! as guest faults.

use emu_core::BusError;

/// Architectural exception vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exception {
    DivisionError = 0,
    Debug = 1,
    Nmi = 2,
    Breakpoint = 3,
    Overflow = 4,
    BoundRangeExceeded = 5,
    InvalidOpcode = 6,
    NoMathCoprocessor = 7,
    DoubleFault = 8,
    Reserved9 = 9,
    InvalidTss = 10,
    SegmentNotPresent = 11,
    StackSegmentFault = 12,
    GeneralProtection = 13,
    PageFault = 14,
}

/// Which exceptions push an error code (#DF, #TS, #NP, #SS, #GP, #PF,
/// and #CP at vector 21).
pub(crate) const ERROR_CODE_MASK: u32 =
    1 << 8 | 1 << 10 | 1 << 11 | 1 << 12 | 1 << 13 | 1 << 14 | 1 << 17 | 1 << 30;

impl Exception {
    #[must_use]
    pub const fn vector(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        EXCEPTION_SHORT_TEXT[self as usize]
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        EXCEPTION_TEXT[self as usize]
    }
}

const EXCEPTION_SHORT_TEXT: [&str; 15] = [
    "#DE", "#DB", "NMI", "#BP", "#OF", "#BR", "#UD", "#NM", "#DF", "#E9", "#TS", "#NP", "#SS",
    "#GP", "#PF",
];

const EXCEPTION_TEXT: [&str; 15] = [
    "Division Error",
    "Debug",
    "Non-maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "Bound Range Exceeded",
    "Invalid Opcode",
    "No Math Coprocessor",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack-Segment Fault",
    "General Protection",
    "Page Fault",
];

/// A raised guest exception with its (optional) error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuException {
    pub number: Exception,
    pub error_code: u32,
}

impl CpuException {
    #[must_use]
    pub const fn new(number: Exception) -> Self {
        Self {
            number,
            error_code: 0,
        }
    }

    #[must_use]
    pub const fn with_code(number: Exception, error_code: u32) -> Self {
        Self { number, error_code }
    }

    #[must_use]
    pub const fn has_error_code(self) -> bool {
        ERROR_CODE_MASK & (1 << self.number as u32) != 0
    }
}

impl std::fmt::Display for CpuException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CPU exception {:#04X} - {} {}",
            self.number as u8,
            self.number.mnemonic(),
            self.number.description()
        )?;
        if self.has_error_code() {
            write!(f, " error code {:#010X}", self.error_code)?;
        }
        Ok(())
    }
}

/// How an interrupt vector entered dispatch. Software `INT n` is subject
/// to the gate DPL check; external and CPU-generated vectors are not, and
/// only CPU-generated vectors push architectural error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOrigin {
    Software,
    Hardware,
    Cpu,
}

/// A delivered interrupt or exception, as recorded in the history ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptEvent {
    pub vector: u8,
    pub origin: InterruptOrigin,
}

impl std::fmt::Display for InterruptEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.origin {
            InterruptOrigin::Software => write!(f, "Interrupt {}", self.vector),
            _ => {
                if let Some(text) = EXCEPTION_SHORT_TEXT.get(self.vector as usize) {
                    write!(
                        f,
                        "Exception {} {} {}",
                        self.vector, text, EXCEPTION_TEXT[self.vector as usize]
                    )
                } else {
                    write!(f, "Exception {}", self.vector)
                }
            }
        }
    }
}

/// Step-level error: a guest exception that escaped injection, the
/// distinct halted-with-interrupts-off condition, or a host failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpuError {
    Exception(CpuException),
    /// The guest executed `HLT` with IF=0: unrecoverable, used by test
    /// harnesses to detect end-of-test.
    Halted,
    /// Host-side failure: unimplemented instruction form, impossible
    /// lookup, broken machine configuration. Fatal; surfaces to the
    /// driver loop.
    Runtime(String),
}

impl From<CpuException> for CpuError {
    fn from(e: CpuException) -> Self {
        Self::Exception(e)
    }
}

impl From<BusError> for CpuError {
    fn from(e: BusError) -> Self {
        Self::Runtime(e.to_string())
    }
}

impl std::fmt::Display for CpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exception(e) => e.fmt(f),
            Self::Halted => f.write_str("CPU halted with IF=0"),
            Self::Runtime(msg) => write!(f, "runtime error: {msg}"),
        }
    }
}

impl std::error::Error for CpuError {}
