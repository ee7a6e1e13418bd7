use std::{fmt, ops};

/// A set of readiness bits. Used both for the interest a caller registers
/// (`spec.md` §6: "readable, writable, priority/exceptional") and for the
/// revents a driver reports back, where `ERROR`/`HUP` may additionally be
/// set (`spec.md` §6: "Returned mask uses the same bits; implementations
/// may additionally report error/hangup").
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Interest(u8);

const READABLE: u8 = 0b0_0001;
const WRITABLE: u8 = 0b0_0010;
const PRIORITY: u8 = 0b0_0100;
const ERROR: u8 = 0b0_1000;
const HUP: u8 = 0b1_0000;

impl Interest {
    #[inline]
    pub fn empty() -> Interest {
        Interest(0)
    }

    #[inline]
    pub fn readable() -> Interest {
        Interest(READABLE)
    }

    #[inline]
    pub fn writable() -> Interest {
        Interest(WRITABLE)
    }

    #[inline]
    pub fn priority() -> Interest {
        Interest(PRIORITY)
    }

    #[inline]
    pub fn error() -> Interest {
        Interest(ERROR)
    }

    #[inline]
    pub fn hup() -> Interest {
        Interest(HUP)
    }

    #[inline]
    pub fn is_readable(self) -> bool {
        self.contains(Interest::readable())
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        self.contains(Interest::writable())
    }

    #[inline]
    pub fn is_priority(self) -> bool {
        self.contains(Interest::priority())
    }

    #[inline]
    pub fn is_error(self) -> bool {
        self.contains(Interest::error())
    }

    #[inline]
    pub fn is_hup(self) -> bool {
        self.contains(Interest::hup())
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn contains(self, other: Interest) -> bool {
        (self.0 & other.0) == other.0 && other.0 != 0
    }

    #[inline]
    pub fn intersects(self, other: Interest) -> bool {
        (self.0 & other.0) != 0
    }
}

impl ops::BitOr for Interest {
    type Output = Interest;

    #[inline]
    fn bitor(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }
}

impl ops::BitOrAssign for Interest {
    #[inline]
    fn bitor_assign(&mut self, other: Interest) {
        self.0 |= other.0;
    }
}

impl ops::BitAnd for Interest {
    type Output = Interest;

    #[inline]
    fn bitand(self, other: Interest) -> Interest {
        Interest(self.0 & other.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut one = false;
        let flags = [
            (Interest::readable(), "Readable"),
            (Interest::writable(), "Writable"),
            (Interest::priority(), "Priority"),
            (Interest::error(), "Error"),
            (Interest::hup(), "Hup"),
        ];

        for &(flag, msg) in &flags {
            if self.contains(flag) {
                if one {
                    write!(fmt, " | ")?;
                }
                write!(fmt, "{}", msg)?;
                one = true;
            }
        }

        if !one {
            write!(fmt, "(empty)")?;
        }

        Ok(())
    }
}
