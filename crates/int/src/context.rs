/* Copyright (c) 2017-2021 Jeremy Davis (jeremydavis519@gmail.com)
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy of this software
 * and associated documentation files (the "Software"), to deal in the Software without restriction,
 * including without limitation the rights to use, copy, modify, merge, publish, distribute,
 * sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all copies or
 * substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT
 * NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
 * NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM,
 * DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.
 */

//! What the CPU left behind when it took an exception, and what that means.
//!
//! The assembly entry stubs save the interrupted registers into a `TrapFrame`. The ARM glue then
//! reads the fault registers once, and `FaultContext::decode` turns the lot into plain numbers.
//! Nothing past this point touches a register.

use {
    core::fmt,
    memory::layout::in_kernel_range,
    shared::{cpu::Psr, ffi_enum}
};

ffi_enum! {
    #[repr(u32)]
    /// The eight ARM exception vectors, in vector-table order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TrapKind {
        /// Reset
        Reset         = 0,
        /// Undefined instruction
        Undefined     = 1,
        /// Software interrupt (`SWI`/`SVC`), used for system calls
        Swi           = 2,
        /// Prefetch abort: an instruction fetch failed
        PrefetchAbort = 3,
        /// Data abort: a load or store failed
        DataAbort     = 4,
        /// The reserved vector, which the CPU never takes on purpose
        Reserved      = 5,
        /// Interrupt request
        Irq           = 6,
        /// Fast interrupt request
        Fiq           = 7
    }
}

impl TrapKind {
    /// Every kind, in vector-table order.
    pub const ALL: [TrapKind; 8] = [
        TrapKind::Reset,
        TrapKind::Undefined,
        TrapKind::Swi,
        TrapKind::PrefetchAbort,
        TrapKind::DataAbort,
        TrapKind::Reserved,
        TrapKind::Irq,
        TrapKind::Fiq
    ];

    /// This kind's slot in the vector table.
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// The registers saved by the entry stubs, in the order they're pushed. The stubs pop `lr` into
/// the program counter on the way out, so a handler resumes somewhere else by changing it.
#[repr(C)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// The saved program status register of the interrupted code
    pub spsr: u32,
    // Keeps the frame a multiple of 8 bytes, as the procedure call standard wants.
    _pad: u32,
    /// r0 through r12
    pub r: [u32; 13],
    /// The exception mode's link register
    pub lr: u32
}

impl TrapFrame {
    /// Makes a frame with the given status and link register and every other register zeroed.
    pub fn new(spsr: u32, lr: u32) -> TrapFrame {
        TrapFrame { spsr, lr, ..TrapFrame::default() }
    }

    /// The interrupted code's status word.
    pub fn status(&self) -> Psr {
        Psr::from_raw(self.spsr)
    }

    /// The system call number, from r7.
    pub fn syscall_number(&self) -> u32 {
        self.r[7]
    }

    /// The system call arguments, from r0 through r3.
    pub fn syscall_args(&self) -> [u32; 4] {
        [self.r[0], self.r[1], self.r[2], self.r[3]]
    }

    /// Puts a system call's result in r0.
    pub fn set_return_value(&mut self, value: u32) {
        self.r[0] = value;
    }

    /// Makes the exception return continue at `addr`.
    pub fn resume_at(&mut self, addr: usize) {
        self.lr = addr as u32;
    }
}

/// The MMU's fault registers, read on entry to the abort handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultRegisters {
    /// Fault address register (CP15 c6)
    pub far: u32,
    /// Data fault status register (CP15 c5)
    pub dfsr: u32
}

/// A short-descriptor fault status code: DFSR bit 10 followed by bits 3:0.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultStatus(u8);

impl FaultStatus {
    /// Alignment fault
    pub const ALIGNMENT: FaultStatus = FaultStatus(0b00001);
    /// Debug event
    pub const DEBUG: FaultStatus = FaultStatus(0b00010);
    /// Access flag fault on a section
    pub const ACCESS_FLAG_SECTION: FaultStatus = FaultStatus(0b00011);
    /// Instruction cache maintenance fault
    pub const CACHE_MAINTENANCE: FaultStatus = FaultStatus(0b00100);
    /// Translation fault on a section
    pub const TRANSLATION_SECTION: FaultStatus = FaultStatus(0b00101);
    /// Access flag fault on a page. The only fault the kernel recovers from.
    pub const ACCESS_FLAG_PAGE: FaultStatus = FaultStatus(0b00110);
    /// Translation fault on a page
    pub const TRANSLATION_PAGE: FaultStatus = FaultStatus(0b00111);
    /// Synchronous external abort
    pub const SYNC_EXTERNAL: FaultStatus = FaultStatus(0b01000);
    /// Domain fault on a section
    pub const DOMAIN_SECTION: FaultStatus = FaultStatus(0b01001);
    /// Domain fault on a page
    pub const DOMAIN_PAGE: FaultStatus = FaultStatus(0b01011);
    /// Synchronous external abort on a first-level table walk
    pub const TABLE_WALK_L1: FaultStatus = FaultStatus(0b01100);
    /// Permission fault on a section
    pub const PERMISSION_SECTION: FaultStatus = FaultStatus(0b01101);
    /// Synchronous external abort on a second-level table walk
    pub const TABLE_WALK_L2: FaultStatus = FaultStatus(0b01110);
    /// Permission fault on a page
    pub const PERMISSION_PAGE: FaultStatus = FaultStatus(0b01111);
    /// TLB conflict or lockdown abort
    pub const LOCKDOWN: FaultStatus = FaultStatus(0b10100);
    /// Asynchronous external abort
    pub const ASYNC_EXTERNAL: FaultStatus = FaultStatus(0b10110);
    /// Asynchronous parity error
    pub const ASYNC_PARITY: FaultStatus = FaultStatus(0b11000);
    /// Synchronous parity error
    pub const SYNC_PARITY: FaultStatus = FaultStatus(0b11001);
    /// Coprocessor abort
    pub const COPROCESSOR: FaultStatus = FaultStatus(0b11010);
    /// Parity error on a first-level table walk
    pub const TABLE_WALK_PARITY_L1: FaultStatus = FaultStatus(0b11100);
    /// Parity error on a second-level table walk
    pub const TABLE_WALK_PARITY_L2: FaultStatus = FaultStatus(0b11110);

    /// Extracts the status code from a DFSR value.
    pub const fn from_dfsr(dfsr: u32) -> FaultStatus {
        FaultStatus((((dfsr >> 6) & 0x10) | (dfsr & 0x0f)) as u8)
    }

    /// Makes a status from a bare five-bit code. Higher bits are ignored.
    pub const fn from_code(code: u8) -> FaultStatus {
        FaultStatus(code & 0x1f)
    }

    /// The five-bit code.
    pub const fn code(self) -> u8 {
        self.0
    }

    /// A short description of the fault.
    pub fn name(self) -> &'static str {
        match self {
            FaultStatus::ALIGNMENT            => "alignment fault",
            FaultStatus::DEBUG                => "debug event",
            FaultStatus::ACCESS_FLAG_SECTION  => "access flag fault (section)",
            FaultStatus::CACHE_MAINTENANCE    => "cache maintenance fault",
            FaultStatus::TRANSLATION_SECTION  => "translation fault (section)",
            FaultStatus::ACCESS_FLAG_PAGE     => "access flag fault (page)",
            FaultStatus::TRANSLATION_PAGE     => "translation fault (page)",
            FaultStatus::SYNC_EXTERNAL        => "synchronous external abort",
            FaultStatus::DOMAIN_SECTION       => "domain fault (section)",
            FaultStatus::DOMAIN_PAGE          => "domain fault (page)",
            FaultStatus::TABLE_WALK_L1        => "external abort on table walk (level 1)",
            FaultStatus::PERMISSION_SECTION   => "permission fault (section)",
            FaultStatus::TABLE_WALK_L2        => "external abort on table walk (level 2)",
            FaultStatus::PERMISSION_PAGE      => "permission fault (page)",
            FaultStatus::LOCKDOWN             => "lockdown abort",
            FaultStatus::ASYNC_EXTERNAL       => "asynchronous external abort",
            FaultStatus::ASYNC_PARITY         => "asynchronous parity error",
            FaultStatus::SYNC_PARITY          => "synchronous parity error",
            FaultStatus::COPROCESSOR          => "coprocessor abort",
            FaultStatus::TABLE_WALK_PARITY_L1 => "parity error on table walk (level 1)",
            FaultStatus::TABLE_WALK_PARITY_L2 => "parity error on table walk (level 2)",
            _                                 => "unknown fault"
        }
    }
}

impl fmt::Debug for FaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({:#07b})", self.name(), self.0)
    }
}

impl fmt::Display for FaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a handler needs to know about one exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultContext {
    /// Which vector was taken
    pub kind: TrapKind,
    /// The interrupted code's status word
    pub status: Psr,
    /// The exception mode's link register, as the CPU set it
    pub link: usize,
    /// The address of the instruction this exception is about: the one that faulted for aborts
    /// and undefined instructions, the `SWI` itself for system calls, and the one to resume at for
    /// interrupts
    pub pc: usize,
    /// For data aborts, the address the faulting access tried to reach
    pub fault_address: Option<usize>,
    /// For data aborts, why the access failed
    pub fault_status: Option<FaultStatus>,
    /// For data aborts, whether the access was a write
    pub write: bool
}

impl FaultContext {
    /// Works out what happened from the saved registers. Infallible: any bit pattern decodes to
    /// something, even if it's nonsense.
    pub fn decode(kind: TrapKind, frame: &TrapFrame, regs: FaultRegisters) -> FaultContext {
        let status = frame.status();
        let link = frame.lr as usize;
        let thumb = status.contains(Psr::THUMB);

        let back = match kind {
            TrapKind::Undefined | TrapKind::Swi => if thumb { 2 } else { 4 },
            TrapKind::PrefetchAbort             => 4,
            TrapKind::DataAbort                 => 8,
            TrapKind::Irq | TrapKind::Fiq       => 4,
            TrapKind::Reset | TrapKind::Reserved => 0
        };

        let (fault_address, fault_status, write) = if kind == TrapKind::DataAbort {
            (Some(regs.far as usize), Some(FaultStatus::from_dfsr(regs.dfsr)), regs.dfsr & (1 << 11) != 0)
        } else {
            (None, None, false)
        };

        FaultContext {
            kind,
            status,
            link,
            pc: link.wrapping_sub(back) & 0xffff_ffff,
            fault_address,
            fault_status,
            write
        }
    }

    /// Whether the interrupted code was running in Thumb state.
    pub fn is_thumb(&self) -> bool {
        self.status.contains(Psr::THUMB)
    }

    /// Whether the interrupted code was running in Jazelle state.
    pub fn is_jazelle(&self) -> bool {
        self.status.contains(Psr::JAZELLE)
    }

    /// Whether the exception came from user code.
    pub fn from_user(&self) -> bool {
        self.status.is_user_mode()
    }

    /// Whether `pc` is in the kernel's part of the address space.
    pub fn pc_in_kernel(&self) -> bool {
        in_kernel_range(self.pc)
    }

    /// Whether the data abort's target address is in the kernel's part of the address space.
    pub fn address_in_kernel(&self) -> bool {
        self.fault_address.map_or(false, in_kernel_range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARM_SVC: u32 = 0x13;
    const THUMB_USR: u32 = 0x30;

    fn decode(kind: TrapKind, spsr: u32, lr: u32) -> FaultContext {
        FaultContext::decode(kind, &TrapFrame::new(spsr, lr), FaultRegisters::default())
    }

    mod pc {
        use super::*;

        #[test]
        fn undefined() {
            assert_eq!(decode(TrapKind::Undefined, ARM_SVC, 0x8004).pc, 0x8000);
            assert_eq!(decode(TrapKind::Undefined, THUMB_USR, 0x8002).pc, 0x8000);
        }

        #[test]
        fn aborts() {
            assert_eq!(decode(TrapKind::PrefetchAbort, ARM_SVC, 0x8004).pc, 0x8000);
            assert_eq!(decode(TrapKind::PrefetchAbort, THUMB_USR, 0x8004).pc, 0x8000);
            assert_eq!(decode(TrapKind::DataAbort, ARM_SVC, 0x8008).pc, 0x8000);
            assert_eq!(decode(TrapKind::DataAbort, THUMB_USR, 0x8008).pc, 0x8000);
        }

        #[test]
        fn interrupts_and_calls() {
            assert_eq!(decode(TrapKind::Irq, ARM_SVC, 0x8004).pc, 0x8000);
            assert_eq!(decode(TrapKind::Fiq, ARM_SVC, 0x8004).pc, 0x8000);
            assert_eq!(decode(TrapKind::Swi, 0x10, 0x8004).pc, 0x8000);
            assert_eq!(decode(TrapKind::Swi, THUMB_USR, 0x8002).pc, 0x8000);
            assert_eq!(decode(TrapKind::Reserved, ARM_SVC, 0x8004).pc, 0x8004);
        }

        #[test]
        fn wraps_at_zero() {
            assert_eq!(decode(TrapKind::DataAbort, ARM_SVC, 4).pc, 0xffff_fffc);
        }

        #[test]
        fn kernel_range() {
            assert!(decode(TrapKind::Undefined, ARM_SVC, 0xf000_0004).pc_in_kernel());
            assert!(!decode(TrapKind::Undefined, ARM_SVC, 0xf000_0002).pc_in_kernel());
            assert!(!decode(TrapKind::Undefined, ARM_SVC, 0xfff0_0004).pc_in_kernel());
        }
    }

    mod state {
        use super::*;

        #[test]
        fn flags() {
            let ctx = decode(TrapKind::Undefined, THUMB_USR | 0x0100_0000, 0x8002);
            assert!(ctx.is_thumb());
            assert!(ctx.is_jazelle());
            assert!(ctx.from_user());

            let ctx = decode(TrapKind::Undefined, ARM_SVC, 0x8004);
            assert!(!ctx.is_thumb());
            assert!(!ctx.is_jazelle());
            assert!(!ctx.from_user());
        }

        #[test]
        fn data_abort_registers() {
            let regs = FaultRegisters { far: 0xf123_4568, dfsr: 0x0000_0806 };
            let ctx = FaultContext::decode(TrapKind::DataAbort, &TrapFrame::new(ARM_SVC, 0x9008), regs);
            assert_eq!(ctx.fault_address, Some(0xf123_4568));
            assert_eq!(ctx.fault_status, Some(FaultStatus::ACCESS_FLAG_PAGE));
            assert!(ctx.write);
            assert!(ctx.address_in_kernel());
        }

        #[test]
        fn fault_registers_only_for_data_aborts() {
            let regs = FaultRegisters { far: 0x1234, dfsr: 0x5 };
            let ctx = FaultContext::decode(TrapKind::PrefetchAbort, &TrapFrame::new(ARM_SVC, 0x9004), regs);
            assert_eq!(ctx.fault_address, None);
            assert_eq!(ctx.fault_status, None);
            assert!(!ctx.address_in_kernel());
        }
    }

    mod fault_status {
        use super::*;

        #[test]
        fn bit_ten_is_the_high_bit() {
            assert_eq!(FaultStatus::from_dfsr(0x406).code(), 0b10110);
            assert_eq!(FaultStatus::from_dfsr(0x406), FaultStatus::ASYNC_EXTERNAL);
            assert_eq!(FaultStatus::from_dfsr(0x0f6).code(), 0b00110);
            assert_eq!(FaultStatus::from_code(0xff).code(), 0x1f);
        }

        #[test]
        fn names() {
            assert_eq!(FaultStatus::TRANSLATION_PAGE.name(), "translation fault (page)");
            assert_eq!(FaultStatus::from_code(0).name(), "unknown fault");
            assert_eq!(format!("{:?}", FaultStatus::ACCESS_FLAG_PAGE), "access flag fault (page) (0b00110)");
        }
    }

    #[test]
    fn kinds_in_vector_order() {
        for (i, kind) in TrapKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(TrapKind::try_from(i as u32).ok(), Some(*kind));
        }
        assert!(TrapKind::try_from(8).is_err());
    }
}
