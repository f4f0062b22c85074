//! Hand-maintained replacement for the bindgen-generated `constants` and
//! `types` modules.
//!
//! The values here are taken directly from the Linux uapi headers (and, for
//! the handful of macros bindgen has never been able to bind - things like
//! `SIG_DFL`, `RLIM_INFINITY`, or anything defined via pointer casts - from
//! the kernel source comments that describe them). Naming matches what
//! bindgen would have produced (`LINUX_` prefix for macros, `linux_` prefix
//! for typedef'd structs) so that the rest of this crate doesn't need to
//! change when regenerating against a newer kernel.
//!
//! x86_64 only.

#![allow(unused)]
#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(clippy::all)]

use core::ffi::{c_char, c_int, c_long, c_uint, c_ulong, c_void};

// ---------------------------------------------------------------------
// `__kernel_*` base types (arch/x86/include/uapi/asm/posix_types.h and
// include/uapi/asm-generic/posix_types.h)
// ---------------------------------------------------------------------

pub type linux___kernel_long_t = c_long;
pub type linux___kernel_ulong_t = c_ulong;
pub type linux___kernel_pid_t = c_int;
pub type linux___kernel_mode_t = c_uint;
pub type linux___kernel_off_t = linux___kernel_long_t;
pub type linux___kernel_size_t = linux___kernel_ulong_t;
pub type linux___kernel_clockid_t = c_int;
pub type linux___kernel_sa_family_t = u16;

pub type linux___u16 = u16;
pub type linux___u32 = u32;

// `fd_set` is a 1024-bit bitmap of `unsigned long`s on x86_64 (16 longs).
#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux___kernel_fd_set {
    pub fds_bits: [linux___kernel_long_t; 16],
}

// ---------------------------------------------------------------------
// errno.h (include/uapi/asm-generic/errno-base.h, errno.h)
// ---------------------------------------------------------------------

pub const LINUX_EPERM: u32 = 1;
pub const LINUX_ENOENT: u32 = 2;
pub const LINUX_ESRCH: u32 = 3;
pub const LINUX_EINTR: u32 = 4;
pub const LINUX_EIO: u32 = 5;
pub const LINUX_ENXIO: u32 = 6;
pub const LINUX_E2BIG: u32 = 7;
pub const LINUX_ENOEXEC: u32 = 8;
pub const LINUX_EBADF: u32 = 9;
pub const LINUX_ECHILD: u32 = 10;
pub const LINUX_EAGAIN: u32 = 11;
pub const LINUX_ENOMEM: u32 = 12;
pub const LINUX_EACCES: u32 = 13;
pub const LINUX_EFAULT: u32 = 14;
pub const LINUX_ENOTBLK: u32 = 15;
pub const LINUX_EBUSY: u32 = 16;
pub const LINUX_EEXIST: u32 = 17;
pub const LINUX_EXDEV: u32 = 18;
pub const LINUX_ENODEV: u32 = 19;
pub const LINUX_ENOTDIR: u32 = 20;
pub const LINUX_EISDIR: u32 = 21;
pub const LINUX_EINVAL: u32 = 22;
pub const LINUX_ENFILE: u32 = 23;
pub const LINUX_EMFILE: u32 = 24;
pub const LINUX_ENOTTY: u32 = 25;
pub const LINUX_ETXTBSY: u32 = 26;
pub const LINUX_EFBIG: u32 = 27;
pub const LINUX_ENOSPC: u32 = 28;
pub const LINUX_ESPIPE: u32 = 29;
pub const LINUX_EROFS: u32 = 30;
pub const LINUX_EMLINK: u32 = 31;
pub const LINUX_EPIPE: u32 = 32;
pub const LINUX_EDOM: u32 = 33;
pub const LINUX_ERANGE: u32 = 34;
pub const LINUX_EDEADLK: u32 = 35;
pub const LINUX_ENAMETOOLONG: u32 = 36;
pub const LINUX_ENOLCK: u32 = 37;
pub const LINUX_ENOSYS: u32 = 38;
pub const LINUX_ENOTEMPTY: u32 = 39;
pub const LINUX_ELOOP: u32 = 40;
pub const LINUX_EWOULDBLOCK: u32 = LINUX_EAGAIN;
pub const LINUX_ENOMSG: u32 = 42;
pub const LINUX_EIDRM: u32 = 43;
pub const LINUX_ECHRNG: u32 = 44;
pub const LINUX_EL2NSYNC: u32 = 45;
pub const LINUX_EL3HLT: u32 = 46;
pub const LINUX_EL3RST: u32 = 47;
pub const LINUX_ELNRNG: u32 = 48;
pub const LINUX_EUNATCH: u32 = 49;
pub const LINUX_ENOCSI: u32 = 50;
pub const LINUX_EL2HLT: u32 = 51;
pub const LINUX_EBADE: u32 = 52;
pub const LINUX_EBADR: u32 = 53;
pub const LINUX_EXFULL: u32 = 54;
pub const LINUX_ENOANO: u32 = 55;
pub const LINUX_EBADRQC: u32 = 56;
pub const LINUX_EBADSLT: u32 = 57;
pub const LINUX_EBFONT: u32 = 59;
pub const LINUX_ENOSTR: u32 = 60;
pub const LINUX_ENODATA: u32 = 61;
pub const LINUX_ETIME: u32 = 62;
pub const LINUX_ENOSR: u32 = 63;
pub const LINUX_ENONET: u32 = 64;
pub const LINUX_ENOPKG: u32 = 65;
pub const LINUX_EREMOTE: u32 = 66;
pub const LINUX_ENOLINK: u32 = 67;
pub const LINUX_EADV: u32 = 68;
pub const LINUX_ESRMNT: u32 = 69;
pub const LINUX_ECOMM: u32 = 70;
pub const LINUX_EPROTO: u32 = 71;
pub const LINUX_EMULTIHOP: u32 = 72;
pub const LINUX_EDOTDOT: u32 = 73;
pub const LINUX_EBADMSG: u32 = 74;
pub const LINUX_EOVERFLOW: u32 = 75;
pub const LINUX_ENOTUNIQ: u32 = 76;
pub const LINUX_EBADFD: u32 = 77;
pub const LINUX_EREMCHG: u32 = 78;
pub const LINUX_ELIBACC: u32 = 79;
pub const LINUX_ELIBBAD: u32 = 80;
pub const LINUX_ELIBSCN: u32 = 81;
pub const LINUX_ELIBMAX: u32 = 82;
pub const LINUX_ELIBEXEC: u32 = 83;
pub const LINUX_EILSEQ: u32 = 84;
pub const LINUX_ERESTART: u32 = 85;
pub const LINUX_ESTRPIPE: u32 = 86;
pub const LINUX_EUSERS: u32 = 87;
pub const LINUX_ENOTSOCK: u32 = 88;
pub const LINUX_EDESTADDRREQ: u32 = 89;
pub const LINUX_EMSGSIZE: u32 = 90;
pub const LINUX_EPROTOTYPE: u32 = 91;
pub const LINUX_ENOPROTOOPT: u32 = 92;
pub const LINUX_EPROTONOSUPPORT: u32 = 93;
pub const LINUX_ESOCKTNOSUPPORT: u32 = 94;
pub const LINUX_EOPNOTSUPP: u32 = 95;
pub const LINUX_EPFNOSUPPORT: u32 = 96;
pub const LINUX_EAFNOSUPPORT: u32 = 97;
pub const LINUX_EADDRINUSE: u32 = 98;
pub const LINUX_EADDRNOTAVAIL: u32 = 99;
pub const LINUX_ENETDOWN: u32 = 100;
pub const LINUX_ENETUNREACH: u32 = 101;
pub const LINUX_ENETRESET: u32 = 102;
pub const LINUX_ECONNABORTED: u32 = 103;
pub const LINUX_ECONNRESET: u32 = 104;
pub const LINUX_ENOBUFS: u32 = 105;
pub const LINUX_EISCONN: u32 = 106;
pub const LINUX_ENOTCONN: u32 = 107;
pub const LINUX_ESHUTDOWN: u32 = 108;
pub const LINUX_ETOOMANYREFS: u32 = 109;
pub const LINUX_ETIMEDOUT: u32 = 110;
pub const LINUX_ECONNREFUSED: u32 = 111;
pub const LINUX_EHOSTDOWN: u32 = 112;
pub const LINUX_EHOSTUNREACH: u32 = 113;
pub const LINUX_EALREADY: u32 = 114;
pub const LINUX_EINPROGRESS: u32 = 115;
pub const LINUX_ESTALE: u32 = 116;
pub const LINUX_EUCLEAN: u32 = 117;
pub const LINUX_ENOTNAM: u32 = 118;
pub const LINUX_ENAVAIL: u32 = 119;
pub const LINUX_EISNAM: u32 = 120;
pub const LINUX_EREMOTEIO: u32 = 121;
pub const LINUX_EDQUOT: u32 = 122;
pub const LINUX_ENOMEDIUM: u32 = 123;
pub const LINUX_EMEDIUMTYPE: u32 = 124;
pub const LINUX_ECANCELED: u32 = 125;
pub const LINUX_ENOKEY: u32 = 126;
pub const LINUX_EKEYEXPIRED: u32 = 127;
pub const LINUX_EKEYREVOKED: u32 = 128;
pub const LINUX_EKEYREJECTED: u32 = 129;
pub const LINUX_EOWNERDEAD: u32 = 130;
pub const LINUX_ENOTRECOVERABLE: u32 = 131;
pub const LINUX_ERFKILL: u32 = 132;
pub const LINUX_EHWPOISON: u32 = 133;
pub const LINUX_EDEADLOCK: u32 = LINUX_EDEADLK;

// ---------------------------------------------------------------------
// signal.h (include/uapi/asm-generic/signal.h, asm/signal.h)
// ---------------------------------------------------------------------

pub const LINUX_SIGHUP: u32 = 1;
pub const LINUX_SIGINT: u32 = 2;
pub const LINUX_SIGQUIT: u32 = 3;
pub const LINUX_SIGILL: u32 = 4;
pub const LINUX_SIGTRAP: u32 = 5;
pub const LINUX_SIGABRT: u32 = 6;
pub const LINUX_SIGIOT: u32 = 6;
pub const LINUX_SIGBUS: u32 = 7;
pub const LINUX_SIGFPE: u32 = 8;
pub const LINUX_SIGKILL: u32 = 9;
pub const LINUX_SIGUSR1: u32 = 10;
pub const LINUX_SIGSEGV: u32 = 11;
pub const LINUX_SIGUSR2: u32 = 12;
pub const LINUX_SIGPIPE: u32 = 13;
pub const LINUX_SIGALRM: u32 = 14;
pub const LINUX_SIGTERM: u32 = 15;
pub const LINUX_SIGSTKFLT: u32 = 16;
pub const LINUX_SIGCHLD: u32 = 17;
pub const LINUX_SIGCONT: u32 = 18;
pub const LINUX_SIGSTOP: u32 = 19;
pub const LINUX_SIGTSTP: u32 = 20;
pub const LINUX_SIGTTIN: u32 = 21;
pub const LINUX_SIGTTOU: u32 = 22;
pub const LINUX_SIGURG: u32 = 23;
pub const LINUX_SIGXCPU: u32 = 24;
pub const LINUX_SIGXFSZ: u32 = 25;
pub const LINUX_SIGVTALRM: u32 = 26;
pub const LINUX_SIGPROF: u32 = 27;
pub const LINUX_SIGWINCH: u32 = 28;
pub const LINUX_SIGIO: u32 = 29;
pub const LINUX_SIGPOLL: u32 = LINUX_SIGIO;
pub const LINUX_SIGPWR: u32 = 30;
pub const LINUX_SIGSYS: u32 = 31;
pub const LINUX_SIGUNUSED: u32 = 31;
pub const LINUX_SIGRTMIN: u32 = 32;

pub const LINUX_SIG_BLOCK: u32 = 0;
pub const LINUX_SIG_UNBLOCK: u32 = 1;
pub const LINUX_SIG_SETMASK: u32 = 2;

pub const LINUX_SA_NOCLDSTOP: u32 = 0x0000_0001;
pub const LINUX_SA_NOCLDWAIT: u32 = 0x0000_0002;
pub const LINUX_SA_SIGINFO: u32 = 0x0000_0004;
pub const LINUX_SA_RESTORER: u32 = 0x0400_0000;
pub const LINUX_SA_ONSTACK: u32 = 0x0800_0000;
pub const LINUX_SA_RESTART: u32 = 0x1000_0000;
pub const LINUX_SA_NODEFER: u32 = 0x4000_0000;
pub const LINUX_SA_RESETHAND: u32 = 0x8000_0000;

pub const LINUX_SS_ONSTACK: u32 = 1;
pub const LINUX_SS_DISABLE: u32 = 2;

// si_code values (include/uapi/asm-generic/siginfo.h)
pub const LINUX_SI_USER: i32 = 0;
pub const LINUX_SI_KERNEL: i32 = 0x80;
pub const LINUX_SI_QUEUE: i32 = -1;
pub const LINUX_SI_TIMER: i32 = -2;
pub const LINUX_SI_MESGQ: i32 = -3;
pub const LINUX_SI_ASYNCIO: i32 = -4;
pub const LINUX_SI_TKILL: i32 = -6;

pub const LINUX_CLD_EXITED: u32 = 1;
pub const LINUX_CLD_KILLED: u32 = 2;
pub const LINUX_CLD_DUMPED: u32 = 3;
pub const LINUX_CLD_TRAPPED: u32 = 4;
pub const LINUX_CLD_STOPPED: u32 = 5;
pub const LINUX_CLD_CONTINUED: u32 = 6;

pub const LINUX_BUS_ADRALN: u32 = 1;
pub const LINUX_BUS_ADRERR: u32 = 2;
pub const LINUX_BUS_OBJERR: u32 = 3;
pub const LINUX_BUS_MCEERR_AR: u32 = 4;
pub const LINUX_BUS_MCEERR_AO: u32 = 5;

pub const LINUX_ILL_ILLOPC: u32 = 1;
pub const LINUX_ILL_ILLOPN: u32 = 2;
pub const LINUX_ILL_ILLADR: u32 = 3;
pub const LINUX_ILL_ILLTRP: u32 = 4;
pub const LINUX_ILL_PRVOPC: u32 = 5;
pub const LINUX_ILL_PRVREG: u32 = 6;
pub const LINUX_ILL_COPROC: u32 = 7;
pub const LINUX_ILL_BADSTK: u32 = 8;
pub const LINUX_ILL_BADIADDR: u32 = 9;

pub const LINUX_FPE_INTDIV: u32 = 1;
pub const LINUX_FPE_INTOVF: u32 = 2;
pub const LINUX_FPE_FLTDIV: u32 = 3;
pub const LINUX_FPE_FLTOVF: u32 = 4;
pub const LINUX_FPE_FLTUND: u32 = 5;
pub const LINUX_FPE_FLTRES: u32 = 6;
pub const LINUX_FPE_FLTINV: u32 = 7;
pub const LINUX_FPE_FLTSUB: u32 = 8;
pub const LINUX_FPE_FLTUNK: u32 = 14;
pub const LINUX_FPE_CONDTRAP: u32 = 15;

pub const LINUX_SEGV_MAPERR: u32 = 1;
pub const LINUX_SEGV_ACCERR: u32 = 2;
pub const LINUX_SEGV_BNDERR: u32 = 3;
pub const LINUX_SEGV_PKUERR: u32 = 4;
pub const LINUX_SEGV_ACCADI: u32 = 5;
pub const LINUX_SEGV_ADIDERR: u32 = 6;
pub const LINUX_SEGV_ADIPERR: u32 = 7;
pub const LINUX_SEGV_MTEAERR: u32 = 8;
pub const LINUX_SEGV_MTESERR: u32 = 9;

pub const LINUX_TRAP_BRKPT: u32 = 1;
pub const LINUX_TRAP_TRACE: u32 = 2;
pub const LINUX_TRAP_BRANCH: u32 = 3;
pub const LINUX_TRAP_HWBKPT: u32 = 4;
pub const LINUX_TRAP_UNK: u32 = 5;
pub const LINUX_TRAP_PERF: u32 = 6;

pub const LINUX_POLL_IN: u32 = 1;
pub const LINUX_POLL_OUT: u32 = 2;
pub const LINUX_POLL_MSG: u32 = 3;
pub const LINUX_POLL_ERR: u32 = 4;
pub const LINUX_POLL_PRI: u32 = 5;
pub const LINUX_POLL_HUP: u32 = 6;

pub const LINUX_SYS_SECCOMP: u32 = 1;

pub const LINUX___NR_rt_sigreturn: u32 = 15;

// x86_64 `sigset_t` as used by the kernel ABI is a single 64-bit word (unlike
// glibc's 1024-bit one).
pub type linux_sigset_t = u64;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_sigval {
    pub l_sival_ptr: *mut c_void,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux___sifields__bindgen_ty_1 {
    pub l_pid: linux___kernel_pid_t,
    pub l_uid: u32,
}
pub type linux___sifields_kill = linux___sifields__bindgen_ty_1;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux___sifields__bindgen_ty_2 {
    pub l_tid: i32,
    pub l_overrun: i32,
    pub l_sigval: linux_sigval,
    pub l_sys_private: i32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux___sifields__bindgen_ty_3 {
    pub l_pid: linux___kernel_pid_t,
    pub l_uid: u32,
    pub l_sigval: linux_sigval,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux___sifields__bindgen_ty_4 {
    pub l_pid: linux___kernel_pid_t,
    pub l_uid: u32,
    pub l_status: i32,
    pub l_utime: linux___kernel_long_t,
    pub l_stime: linux___kernel_long_t,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux___sifields__bindgen_ty_5 {
    pub l_addr: *mut c_void,
    pub l_trapno: i32,
    pub l_lower: *mut c_void,
    pub l_upper: *mut c_void,
    pub l_pkey: i32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux___sifields__bindgen_ty_6 {
    pub l_band: linux___kernel_long_t,
    pub l_fd: i32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux___sifields__bindgen_ty_7 {
    pub l_call_addr: *mut c_void,
    pub l_syscall: i32,
    pub l_arch: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union linux___sifields {
    pub l_kill: linux___sifields__bindgen_ty_1,
    pub l_timer: linux___sifields__bindgen_ty_2,
    pub l_rt: linux___sifields__bindgen_ty_3,
    pub l_sigchld: linux___sifields__bindgen_ty_4,
    pub l_sigfault: linux___sifields__bindgen_ty_5,
    pub l_sigpoll: linux___sifields__bindgen_ty_6,
    pub l_sigsys: linux___sifields__bindgen_ty_7,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_siginfo__bindgen_ty_1__bindgen_ty_1 {
    pub lsi_signo: i32,
    pub lsi_errno: i32,
    pub lsi_code: i32,
    pub l_sifields: linux___sifields,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union linux_siginfo__bindgen_ty_1 {
    pub l__bindgen_anon_1: linux_siginfo__bindgen_ty_1__bindgen_ty_1,
    pub l__si_pad: [c_int; 32],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union linux_siginfo_t {
    pub l__bindgen_anon_1: linux_siginfo__bindgen_ty_1,
}

pub type SignalHandlerFnRaw = unsafe extern "C" fn(c_int);

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_sigaction {
    pub lsa_handler: Option<SignalHandlerFnRaw>,
    pub lsa_flags: u64,
    pub lsa_restorer: Option<unsafe extern "C" fn()>,
    pub lsa_mask: linux_sigset_t,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_stack_t {
    pub ss_sp: *mut c_void,
    pub ss_flags: i32,
    pub ss_size: linux___kernel_size_t,
}

// ---------------------------------------------------------------------
// resource.h (include/uapi/asm-generic/resource.h)
// ---------------------------------------------------------------------

pub const LINUX_RLIMIT_CPU: u32 = 0;
pub const LINUX_RLIMIT_FSIZE: u32 = 1;
pub const LINUX_RLIMIT_DATA: u32 = 2;
pub const LINUX_RLIMIT_STACK: u32 = 3;
pub const LINUX_RLIMIT_CORE: u32 = 4;
pub const LINUX_RLIMIT_RSS: u32 = 5;
pub const LINUX_RLIMIT_NPROC: u32 = 6;
pub const LINUX_RLIMIT_NOFILE: u32 = 7;
pub const LINUX_RLIMIT_MEMLOCK: u32 = 8;
pub const LINUX_RLIMIT_AS: u32 = 9;
pub const LINUX_RLIMIT_LOCKS: u32 = 10;
pub const LINUX_RLIMIT_SIGPENDING: u32 = 11;
pub const LINUX_RLIMIT_MSGQUEUE: u32 = 12;
pub const LINUX_RLIMIT_NICE: u32 = 13;
pub const LINUX_RLIMIT_RTPRIO: u32 = 14;
pub const LINUX_RLIMIT_RTTIME: u32 = 15;
pub const LINUX_RLIM_NLIMITS: u32 = 16;

pub const LINUX_RLIM_INFINITY: i32 = -1;
pub const LINUX_RLIM64_INFINITY: i32 = -1;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_rlimit {
    pub rlim_cur: linux___kernel_ulong_t,
    pub rlim_max: linux___kernel_ulong_t,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_rlimit64 {
    pub rlim_cur: u64,
    pub rlim_max: u64,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_timeval {
    pub tv_sec: linux___kernel_long_t,
    pub tv_usec: linux___kernel_long_t,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_rusage {
    pub ru_utime: linux_timeval,
    pub ru_stime: linux_timeval,
    pub ru_maxrss: linux___kernel_long_t,
    pub ru_ixrss: linux___kernel_long_t,
    pub ru_idrss: linux___kernel_long_t,
    pub ru_isrss: linux___kernel_long_t,
    pub ru_minflt: linux___kernel_long_t,
    pub ru_majflt: linux___kernel_long_t,
    pub ru_nswap: linux___kernel_long_t,
    pub ru_inblock: linux___kernel_long_t,
    pub ru_oublock: linux___kernel_long_t,
    pub ru_msgsnd: linux___kernel_long_t,
    pub ru_msgrcv: linux___kernel_long_t,
    pub ru_nsignals: linux___kernel_long_t,
    pub ru_nvcsw: linux___kernel_long_t,
    pub ru_nivcsw: linux___kernel_long_t,
}

// ---------------------------------------------------------------------
// wait.h (include/uapi/linux/wait.h)
// ---------------------------------------------------------------------

pub const LINUX_WNOHANG: u32 = 0x0000_0001;
pub const LINUX_WUNTRACED: u32 = 0x0000_0002;
pub const LINUX_WSTOPPED: u32 = LINUX_WUNTRACED;
pub const LINUX_WEXITED: u32 = 0x0000_0004;
pub const LINUX_WCONTINUED: u32 = 0x0000_0008;
pub const LINUX_WNOWAIT: u32 = 0x0100_0000;

pub const LINUX___WNOTHREAD: u32 = 0x2000_0000;
pub const LINUX___WALL: u32 = 0x4000_0000;
pub const LINUX___WCLONE: u32 = 0x8000_0000;

pub const LINUX_P_ALL: u32 = 0;
pub const LINUX_P_PID: u32 = 1;
pub const LINUX_P_PGID: u32 = 2;
pub const LINUX_P_PIDFD: u32 = 3;

// ---------------------------------------------------------------------
// sched.h clone flags (include/uapi/linux/sched.h) - note: no LINUX_ prefix
// to match the existing crate convention for this one header.
// ---------------------------------------------------------------------

pub const CLONE_VM: u64 = 0x0000_0100;
pub const CLONE_FS: u64 = 0x0000_0200;
pub const CLONE_FILES: u64 = 0x0000_0400;
pub const CLONE_SIGHAND: u64 = 0x0000_0800;
pub const CLONE_PIDFD: u64 = 0x0000_1000;
pub const CLONE_PTRACE: u64 = 0x0000_2000;
pub const CLONE_VFORK: u64 = 0x0000_4000;
pub const CLONE_PARENT: u64 = 0x0000_8000;
pub const CLONE_THREAD: u64 = 0x0001_0000;
pub const CLONE_NEWNS: u64 = 0x0002_0000;
pub const CLONE_SYSVSEM: u64 = 0x0004_0000;
pub const CLONE_SETTLS: u64 = 0x0008_0000;
pub const CLONE_PARENT_SETTID: u64 = 0x0010_0000;
pub const CLONE_CHILD_CLEARTID: u64 = 0x0020_0000;
pub const CLONE_DETACHED: u64 = 0x0040_0000;
pub const CLONE_UNTRACED: u64 = 0x0080_0000;
pub const CLONE_CHILD_SETTID: u64 = 0x0100_0000;
pub const CLONE_NEWCGROUP: u64 = 0x0200_0000;
pub const CLONE_NEWUTS: u64 = 0x0400_0000;
pub const CLONE_NEWIPC: u64 = 0x0800_0000;
pub const CLONE_NEWUSER: u64 = 0x1000_0000;
pub const CLONE_NEWPID: u64 = 0x2000_0000;
pub const CLONE_NEWNET: u64 = 0x4000_0000;
pub const CLONE_IO: u64 = 0x8000_0000;
pub const CLONE_CLEAR_SIGHAND: u64 = 0x1_0000_0000;
pub const CLONE_INTO_CGROUP: u64 = 0x2_0000_0000;
pub const CLONE_NEWTIME: u64 = 0x0000_0080;

// ---------------------------------------------------------------------
// epoll.h (include/uapi/linux/eventpoll.h)
// ---------------------------------------------------------------------

pub const LINUX_EPOLL_CLOEXEC: u32 = 0x8_0000; // O_CLOEXEC

pub const LINUX_EPOLL_CTL_ADD: u32 = 1;
pub const LINUX_EPOLL_CTL_DEL: u32 = 2;
pub const LINUX_EPOLL_CTL_MOD: u32 = 3;

pub const LINUX_EPOLLIN: u32 = 0x0000_0001;
pub const LINUX_EPOLLPRI: u32 = 0x0000_0002;
pub const LINUX_EPOLLOUT: u32 = 0x0000_0004;
pub const LINUX_EPOLLERR: u32 = 0x0000_0008;
pub const LINUX_EPOLLHUP: u32 = 0x0000_0010;
pub const LINUX_EPOLLNVAL: u32 = 0x0000_0020;
pub const LINUX_EPOLLRDNORM: u32 = 0x0000_0040;
pub const LINUX_EPOLLRDBAND: u32 = 0x0000_0080;
pub const LINUX_EPOLLWRNORM: u32 = 0x0000_0100;
pub const LINUX_EPOLLWRBAND: u32 = 0x0000_0200;
pub const LINUX_EPOLLMSG: u32 = 0x0000_0400;
pub const LINUX_EPOLLRDHUP: u32 = 0x0000_2000;
pub const LINUX_EPOLLEXCLUSIVE: u32 = 1 << 28;
pub const LINUX_EPOLLWAKEUP: u32 = 1 << 29;
pub const LINUX_EPOLLONESHOT: u32 = 1 << 30;
pub const LINUX_EPOLLET: u32 = 1 << 31;

#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct linux_epoll_event {
    pub events: u32,
    pub data: u64,
}

// ---------------------------------------------------------------------
// fcntl.h (include/uapi/asm-generic/fcntl.h)
// ---------------------------------------------------------------------

pub const LINUX_O_ACCMODE: u32 = 0o0000_0003;
pub const LINUX_O_RDONLY: u32 = 0o0000_0000;
pub const LINUX_O_WRONLY: u32 = 0o0000_0001;
pub const LINUX_O_RDWR: u32 = 0o0000_0002;
pub const LINUX_O_CREAT: u32 = 0o0000_0100;
pub const LINUX_O_EXCL: u32 = 0o0000_0200;
pub const LINUX_O_NOCTTY: u32 = 0o0000_0400;
pub const LINUX_O_TRUNC: u32 = 0o0000_1000;
pub const LINUX_O_APPEND: u32 = 0o0000_2000;
pub const LINUX_O_NONBLOCK: u32 = 0o0000_4000;
pub const LINUX_O_NDELAY: u32 = LINUX_O_NONBLOCK;
pub const LINUX_O_DSYNC: u32 = 0o0001_0000;
pub const LINUX_FASYNC: u32 = 0o0002_0000;
pub const LINUX_O_DIRECT: u32 = 0o0004_0000;
pub const LINUX_O_LARGEFILE: u32 = 0o0010_0000;
pub const LINUX_O_DIRECTORY: u32 = 0o0020_0000;
pub const LINUX_O_NOFOLLOW: u32 = 0o0040_0000;
pub const LINUX_O_NOATIME: u32 = 0o0100_0000;
pub const LINUX_O_CLOEXEC: u32 = 0o2000_0000;
pub const LINUX_O_SYNC: u32 = 0o0004_0000_0 | LINUX_O_DSYNC;
pub const LINUX_O_PATH: u32 = 0o1000_0000;
pub const LINUX_O_TMPFILE: u32 = 0o0020_0000_0 | LINUX_O_DIRECTORY;

pub const LINUX_AT_EMPTY_PATH: u32 = 0x1000;
pub const LINUX_AT_SYMLINK_NOFOLLOW: u32 = 0x100;

pub const LINUX_F_DUPFD: u32 = 0;
pub const LINUX_F_GETFD: u32 = 1;
pub const LINUX_F_SETFD: u32 = 2;
pub const LINUX_F_GETFL: u32 = 3;
pub const LINUX_F_SETFL: u32 = 4;
pub const LINUX_F_GETLK: u32 = 5;
pub const LINUX_F_SETLK: u32 = 6;
pub const LINUX_F_SETLKW: u32 = 7;
pub const LINUX_F_SETOWN: u32 = 8;
pub const LINUX_F_GETOWN: u32 = 9;
pub const LINUX_F_SETSIG: u32 = 10;
pub const LINUX_F_GETSIG: u32 = 11;
pub const LINUX_F_GETLK64: u32 = 12;
pub const LINUX_F_SETLK64: u32 = 13;
pub const LINUX_F_SETLKW64: u32 = 14;
pub const LINUX_F_SETOWN_EX: u32 = 15;
pub const LINUX_F_GETOWN_EX: u32 = 16;
pub const LINUX_F_GETOWNER_UIDS: u32 = 17;
pub const LINUX_F_OFD_GETLK: u32 = 36;
pub const LINUX_F_OFD_SETLK: u32 = 37;
pub const LINUX_F_OFD_SETLKW: u32 = 38;
pub const LINUX_F_SETLEASE: u32 = 1024;
pub const LINUX_F_GETLEASE: u32 = 1025;
pub const LINUX_F_NOTIFY: u32 = 1026;
pub const LINUX_F_DUPFD_QUERY: u32 = 1027;
pub const LINUX_F_CANCELLK: u32 = 1029;
pub const LINUX_F_DUPFD_CLOEXEC: u32 = 1030;
pub const LINUX_F_SETPIPE_SZ: u32 = 1031;
pub const LINUX_F_GETPIPE_SZ: u32 = 1032;
pub const LINUX_F_ADD_SEALS: u32 = 1033;
pub const LINUX_F_GET_SEALS: u32 = 1034;
pub const LINUX_F_GET_RW_HINT: u32 = 1035;
pub const LINUX_F_SET_RW_HINT: u32 = 1036;
pub const LINUX_F_GET_FILE_RW_HINT: u32 = 1037;
pub const LINUX_F_SET_FILE_RW_HINT: u32 = 1038;

pub const LINUX_F_OWNER_TID: u32 = 0;
pub const LINUX_F_OWNER_PID: u32 = 1;
pub const LINUX_F_OWNER_PGRP: u32 = 2;

pub const LINUX_F_RDLCK: u32 = 0;
pub const LINUX_F_WRLCK: u32 = 1;
pub const LINUX_F_UNLCK: u32 = 2;
pub const LINUX_F_EXLCK: u32 = 4;
pub const LINUX_F_SHLCK: u32 = 8;

pub const LINUX_F_SEAL_SEAL: u32 = 0x0001;
pub const LINUX_F_SEAL_SHRINK: u32 = 0x0002;
pub const LINUX_F_SEAL_GROW: u32 = 0x0004;
pub const LINUX_F_SEAL_WRITE: u32 = 0x0008;
pub const LINUX_F_SEAL_FUTURE_WRITE: u32 = 0x0010;
pub const LINUX_F_SEAL_EXEC: u32 = 0x0020;

pub const LINUX_RWH_WRITE_LIFE_NOT_SET: u32 = 0;
pub const LINUX_RWH_WRITE_LIFE_NONE: u32 = 1;
pub const LINUX_RWH_WRITE_LIFE_SHORT: u32 = 2;
pub const LINUX_RWH_WRITE_LIFE_MEDIUM: u32 = 3;
pub const LINUX_RWH_WRITE_LIFE_LONG: u32 = 4;
pub const LINUX_RWH_WRITE_LIFE_EXTREME: u32 = 5;

pub const LINUX_FD_CLOEXEC: u32 = 1;

// ---------------------------------------------------------------------
// mman.h (include/uapi/asm-generic/mman{,-common}.h)
// ---------------------------------------------------------------------

pub const LINUX_PROT_READ: u32 = 0x1;
pub const LINUX_PROT_WRITE: u32 = 0x2;
pub const LINUX_PROT_EXEC: u32 = 0x4;
pub const LINUX_PROT_SEM: u32 = 0x8;
pub const LINUX_PROT_NONE: u32 = 0x0;
pub const LINUX_PROT_GROWSDOWN: u32 = 0x0100_0000;
pub const LINUX_PROT_GROWSUP: u32 = 0x0200_0000;

pub const LINUX_MAP_TYPE: u32 = 0x0f;
pub const LINUX_MAP_FIXED: u32 = 0x10;
pub const LINUX_MAP_ANONYMOUS: u32 = 0x20;
pub const LINUX_MAP_POPULATE: u32 = 0x00_8000;
pub const LINUX_MAP_NONBLOCK: u32 = 0x01_0000;
pub const LINUX_MAP_STACK: u32 = 0x02_0000;
pub const LINUX_MAP_HUGETLB: u32 = 0x04_0000;
pub const LINUX_MAP_SYNC: u32 = 0x08_0000;
pub const LINUX_MAP_FIXED_NOREPLACE: u32 = 0x10_0000;
pub const LINUX_MAP_UNINITIALIZED: u32 = 0x400_0000;
pub const LINUX_MAP_SHARED: u32 = 0x01;
pub const LINUX_MAP_PRIVATE: u32 = 0x02;
pub const LINUX_MAP_SHARED_VALIDATE: u32 = 0x03;
pub const LINUX_MAP_GROWSDOWN: u32 = 0x0100;
pub const LINUX_MAP_DENYWRITE: u32 = 0x0800;
pub const LINUX_MAP_EXECUTABLE: u32 = 0x1000;
pub const LINUX_MAP_LOCKED: u32 = 0x2000;
pub const LINUX_MAP_NORESERVE: u32 = 0x4000;

pub const LINUX_MAP_HUGE_SHIFT: u32 = 26;
pub const LINUX_MAP_HUGE_MASK: u32 = 0x3f;
pub const LINUX_MAP_HUGE_16KB: u32 = 14 << LINUX_MAP_HUGE_SHIFT;
pub const LINUX_MAP_HUGE_64KB: u32 = 16 << LINUX_MAP_HUGE_SHIFT;
pub const LINUX_MAP_HUGE_512KB: u32 = 19 << LINUX_MAP_HUGE_SHIFT;
pub const LINUX_MAP_HUGE_1MB: u32 = 20 << LINUX_MAP_HUGE_SHIFT;
pub const LINUX_MAP_HUGE_2MB: u32 = 21 << LINUX_MAP_HUGE_SHIFT;
pub const LINUX_MAP_HUGE_8MB: u32 = 23 << LINUX_MAP_HUGE_SHIFT;
pub const LINUX_MAP_HUGE_16MB: u32 = 24 << LINUX_MAP_HUGE_SHIFT;
pub const LINUX_MAP_HUGE_32MB: u32 = 25 << LINUX_MAP_HUGE_SHIFT;
pub const LINUX_MAP_HUGE_256MB: u32 = 28 << LINUX_MAP_HUGE_SHIFT;
pub const LINUX_MAP_HUGE_512MB: u32 = 29 << LINUX_MAP_HUGE_SHIFT;
pub const LINUX_MAP_HUGE_1GB: u32 = 30 << LINUX_MAP_HUGE_SHIFT;
pub const LINUX_MAP_HUGE_2GB: u32 = 31 << LINUX_MAP_HUGE_SHIFT;
pub const LINUX_MAP_HUGE_16GB: u32 = 34 << LINUX_MAP_HUGE_SHIFT;

pub const LINUX_MREMAP_MAYMOVE: u32 = 1;
pub const LINUX_MREMAP_FIXED: u32 = 2;
pub const LINUX_MREMAP_DONTUNMAP: u32 = 4;

// ---------------------------------------------------------------------
// futex.h (include/uapi/linux/futex.h)
// ---------------------------------------------------------------------

pub const LINUX_FUTEX_WAIT: u32 = 0;
pub const LINUX_FUTEX_WAKE: u32 = 1;
pub const LINUX_FUTEX_FD: u32 = 2;
pub const LINUX_FUTEX_REQUEUE: u32 = 3;
pub const LINUX_FUTEX_CMP_REQUEUE: u32 = 4;
pub const LINUX_FUTEX_WAKE_OP: u32 = 5;
pub const LINUX_FUTEX_LOCK_PI: u32 = 6;
pub const LINUX_FUTEX_UNLOCK_PI: u32 = 7;
pub const LINUX_FUTEX_TRYLOCK_PI: u32 = 8;
pub const LINUX_FUTEX_WAIT_BITSET: u32 = 9;
pub const LINUX_FUTEX_WAKE_BITSET: u32 = 10;
pub const LINUX_FUTEX_WAIT_REQUEUE_PI: u32 = 11;
pub const LINUX_FUTEX_CMP_REQUEUE_PI: u32 = 12;
pub const LINUX_FUTEX_LOCK_PI2: u32 = 13;

pub const LINUX_FUTEX_PRIVATE_FLAG: u32 = 128;
pub const LINUX_FUTEX_CLOCK_REALTIME: u32 = 256;
pub const LINUX_FUTEX_CMD_MASK: i32 = !(LINUX_FUTEX_PRIVATE_FLAG | LINUX_FUTEX_CLOCK_REALTIME) as i32;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_robust_list {
    pub next: *mut linux_robust_list,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_robust_list_head {
    pub list: linux_robust_list,
    pub futex_offset: linux___kernel_long_t,
    pub list_op_pending: *mut linux_robust_list,
}

// ---------------------------------------------------------------------
// prctl.h (include/uapi/linux/prctl.h)
// ---------------------------------------------------------------------

pub const LINUX_PR_SET_PDEATHSIG: u32 = 1;
pub const LINUX_PR_GET_PDEATHSIG: u32 = 2;
pub const LINUX_PR_GET_DUMPABLE: u32 = 3;
pub const LINUX_PR_SET_DUMPABLE: u32 = 4;
pub const LINUX_PR_GET_UNALIGN: u32 = 5;
pub const LINUX_PR_SET_UNALIGN: u32 = 6;
pub const LINUX_PR_GET_KEEPCAPS: u32 = 7;
pub const LINUX_PR_SET_KEEPCAPS: u32 = 8;
pub const LINUX_PR_GET_FPEMU: u32 = 9;
pub const LINUX_PR_SET_FPEMU: u32 = 10;
pub const LINUX_PR_GET_FPEXC: u32 = 11;
pub const LINUX_PR_SET_FPEXC: u32 = 12;
pub const LINUX_PR_GET_TIMING: u32 = 13;
pub const LINUX_PR_SET_TIMING: u32 = 14;
pub const LINUX_PR_SET_NAME: u32 = 15;
pub const LINUX_PR_GET_NAME: u32 = 16;
pub const LINUX_PR_GET_ENDIAN: u32 = 19;
pub const LINUX_PR_SET_ENDIAN: u32 = 20;
pub const LINUX_PR_GET_SECCOMP: u32 = 21;
pub const LINUX_PR_SET_SECCOMP: u32 = 22;
pub const LINUX_PR_CAPBSET_READ: u32 = 23;
pub const LINUX_PR_CAPBSET_DROP: u32 = 24;
pub const LINUX_PR_GET_TSC: u32 = 25;
pub const LINUX_PR_SET_TSC: u32 = 26;
pub const LINUX_PR_GET_SECUREBITS: u32 = 27;
pub const LINUX_PR_SET_SECUREBITS: u32 = 28;
pub const LINUX_PR_SET_TIMERSLACK: u32 = 29;
pub const LINUX_PR_GET_TIMERSLACK: u32 = 30;
pub const LINUX_PR_TASK_PERF_EVENTS_DISABLE: u32 = 31;
pub const LINUX_PR_TASK_PERF_EVENTS_ENABLE: u32 = 32;
pub const LINUX_PR_MCE_KILL: u32 = 33;
pub const LINUX_PR_MCE_KILL_GET: u32 = 34;
pub const LINUX_PR_SET_MM: u32 = 35;
pub const LINUX_PR_SET_PTRACER: u32 = 0x5961_6d61;
pub const LINUX_PR_SET_CHILD_SUBREAPER: u32 = 36;
pub const LINUX_PR_GET_CHILD_SUBREAPER: u32 = 37;
pub const LINUX_PR_SET_NO_NEW_PRIVS: u32 = 38;
pub const LINUX_PR_GET_NO_NEW_PRIVS: u32 = 39;
pub const LINUX_PR_GET_TID_ADDRESS: u32 = 40;
pub const LINUX_PR_SET_THP_DISABLE: u32 = 41;
pub const LINUX_PR_GET_THP_DISABLE: u32 = 42;
pub const LINUX_PR_MPX_ENABLE_MANAGEMENT: u32 = 43;
pub const LINUX_PR_MPX_DISABLE_MANAGEMENT: u32 = 44;
pub const LINUX_PR_SET_FP_MODE: u32 = 45;
pub const LINUX_PR_GET_FP_MODE: u32 = 46;
pub const LINUX_PR_CAP_AMBIENT: u32 = 47;
pub const LINUX_PR_SVE_SET_VL: u32 = 50;
pub const LINUX_PR_SVE_GET_VL: u32 = 51;
pub const LINUX_PR_GET_SPECULATION_CTRL: u32 = 52;
pub const LINUX_PR_SET_SPECULATION_CTRL: u32 = 53;
pub const LINUX_PR_PAC_RESET_KEYS: u32 = 54;
pub const LINUX_PR_SET_TAGGED_ADDR_CTRL: u32 = 55;
pub const LINUX_PR_GET_TAGGED_ADDR_CTRL: u32 = 56;
pub const LINUX_PR_SET_IO_FLUSHER: u32 = 57;
pub const LINUX_PR_GET_IO_FLUSHER: u32 = 58;
pub const LINUX_PR_SET_SYSCALL_USER_DISPATCH: u32 = 59;
pub const LINUX_PR_PAC_SET_ENABLED_KEYS: u32 = 60;
pub const LINUX_PR_PAC_GET_ENABLED_KEYS: u32 = 61;
pub const LINUX_PR_SCHED_CORE: u32 = 62;
pub const LINUX_PR_SME_SET_VL: u32 = 63;
pub const LINUX_PR_SME_GET_VL: u32 = 64;
pub const LINUX_PR_SET_MDWE: u32 = 65;
pub const LINUX_PR_GET_MDWE: u32 = 66;
pub const LINUX_PR_SET_VMA: u32 = 0x53_56_4d_41;
pub const LINUX_PR_GET_AUXV: u32 = 0x41_55_58_56;
pub const LINUX_PR_SET_MEMORY_MERGE: u32 = 67;
pub const LINUX_PR_GET_MEMORY_MERGE: u32 = 68;
pub const LINUX_PR_RISCV_V_SET_CONTROL: u32 = 69;
pub const LINUX_PR_RISCV_V_GET_CONTROL: u32 = 70;
pub const LINUX_PR_RISCV_SET_ICACHE_FLUSH_CTX: u32 = 71;
pub const LINUX_PR_PPC_GET_DEXCR: u32 = 72;
pub const LINUX_PR_PPC_SET_DEXCR: u32 = 73;

// ---------------------------------------------------------------------
// stat.h (include/uapi/linux/stat.h, include/uapi/asm-generic/stat.h)
// ---------------------------------------------------------------------

pub const LINUX_S_IFMT: u32 = 0o170000;
pub const LINUX_S_IFSOCK: u32 = 0o140000;
pub const LINUX_S_IFLNK: u32 = 0o120000;
pub const LINUX_S_IFREG: u32 = 0o100000;
pub const LINUX_S_IFBLK: u32 = 0o060000;
pub const LINUX_S_IFDIR: u32 = 0o040000;
pub const LINUX_S_IFCHR: u32 = 0o020000;
pub const LINUX_S_IFIFO: u32 = 0o010000;
pub const LINUX_S_ISUID: u32 = 0o004000;
pub const LINUX_S_ISGID: u32 = 0o002000;
pub const LINUX_S_ISVTX: u32 = 0o001000;
pub const LINUX_S_IRWXU: u32 = 0o0700;
pub const LINUX_S_IRUSR: u32 = 0o0400;
pub const LINUX_S_IWUSR: u32 = 0o0200;
pub const LINUX_S_IXUSR: u32 = 0o0100;
pub const LINUX_S_IRWXG: u32 = 0o0070;
pub const LINUX_S_IRGRP: u32 = 0o0040;
pub const LINUX_S_IWGRP: u32 = 0o0020;
pub const LINUX_S_IXGRP: u32 = 0o0010;
pub const LINUX_S_IRWXO: u32 = 0o0007;
pub const LINUX_S_IROTH: u32 = 0o0004;
pub const LINUX_S_IWOTH: u32 = 0o0002;
pub const LINUX_S_IXOTH: u32 = 0o0001;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_stat {
    pub st_dev: u64,
    pub st_ino: u64,
    pub st_nlink: u64,
    pub st_mode: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub __pad0: u32,
    pub st_rdev: u64,
    pub st_size: i64,
    pub st_blksize: i64,
    pub st_blocks: i64,
    pub st_atime: i64,
    pub st_atime_nsec: i64,
    pub st_mtime: i64,
    pub st_mtime_nsec: i64,
    pub st_ctime: i64,
    pub st_ctime_nsec: i64,
    pub __unused: [i64; 3],
}

// ---------------------------------------------------------------------
// close_range.h (include/uapi/linux/close_range.h)
// ---------------------------------------------------------------------

pub const LINUX_CLOSE_RANGE_UNSHARE: u32 = 1 << 1;
pub const LINUX_CLOSE_RANGE_CLOEXEC: u32 = 1 << 2;

// ---------------------------------------------------------------------
// socket.h (include/linux/socket.h)
// ---------------------------------------------------------------------

pub const LINUX_AF_UNSPEC: u32 = 0;
pub const LINUX_AF_UNIX: u32 = 1;
pub const LINUX_AF_LOCAL: u32 = 1;
pub const LINUX_AF_INET: u32 = 2;
pub const LINUX_AF_AX25: u32 = 3;
pub const LINUX_AF_IPX: u32 = 4;
pub const LINUX_AF_APPLETALK: u32 = 5;
pub const LINUX_AF_NETROM: u32 = 6;
pub const LINUX_AF_BRIDGE: u32 = 7;
pub const LINUX_AF_ATMPVC: u32 = 8;
pub const LINUX_AF_X25: u32 = 9;
pub const LINUX_AF_INET6: u32 = 10;
pub const LINUX_AF_ROSE: u32 = 11;
pub const LINUX_AF_DECnet: u32 = 12;
pub const LINUX_AF_NETBEUI: u32 = 13;
pub const LINUX_AF_SECURITY: u32 = 14;
pub const LINUX_AF_KEY: u32 = 15;
pub const LINUX_AF_NETLINK: u32 = 16;
pub const LINUX_AF_ROUTE: u32 = LINUX_AF_NETLINK;
pub const LINUX_AF_PACKET: u32 = 17;
pub const LINUX_AF_ASH: u32 = 18;
pub const LINUX_AF_ECONET: u32 = 19;
pub const LINUX_AF_ATMSVC: u32 = 20;
pub const LINUX_AF_RDS: u32 = 21;
pub const LINUX_AF_SNA: u32 = 22;
pub const LINUX_AF_IRDA: u32 = 23;
pub const LINUX_AF_PPPOX: u32 = 24;
pub const LINUX_AF_WANPIPE: u32 = 25;
pub const LINUX_AF_LLC: u32 = 26;
pub const LINUX_AF_IB: u32 = 27;
pub const LINUX_AF_MPLS: u32 = 28;
pub const LINUX_AF_CAN: u32 = 29;
pub const LINUX_AF_TIPC: u32 = 30;
pub const LINUX_AF_BLUETOOTH: u32 = 31;
pub const LINUX_AF_IUCV: u32 = 32;
pub const LINUX_AF_RXRPC: u32 = 33;
pub const LINUX_AF_ISDN: u32 = 34;
pub const LINUX_AF_PHONET: u32 = 35;
pub const LINUX_AF_IEEE802154: u32 = 36;
pub const LINUX_AF_CAIF: u32 = 37;
pub const LINUX_AF_ALG: u32 = 38;
pub const LINUX_AF_NFC: u32 = 39;
pub const LINUX_AF_VSOCK: u32 = 40;
pub const LINUX_AF_KCM: u32 = 41;
pub const LINUX_AF_QIPCRTR: u32 = 42;
pub const LINUX_AF_SMC: u32 = 43;
pub const LINUX_AF_XDP: u32 = 44;
pub const LINUX_AF_MCTP: u32 = 45;

// ---------------------------------------------------------------------
// time.h (include/uapi/linux/time.h)
// ---------------------------------------------------------------------

pub const LINUX_CLOCK_REALTIME: u32 = 0;
pub const LINUX_CLOCK_MONOTONIC: u32 = 1;
pub const LINUX_CLOCK_PROCESS_CPUTIME_ID: u32 = 2;
pub const LINUX_CLOCK_THREAD_CPUTIME_ID: u32 = 3;
pub const LINUX_CLOCK_MONOTONIC_RAW: u32 = 4;
pub const LINUX_CLOCK_REALTIME_COARSE: u32 = 5;
pub const LINUX_CLOCK_MONOTONIC_COARSE: u32 = 6;
pub const LINUX_CLOCK_BOOTTIME: u32 = 7;
pub const LINUX_CLOCK_REALTIME_ALARM: u32 = 8;
pub const LINUX_CLOCK_BOOTTIME_ALARM: u32 = 9;
pub const LINUX_CLOCK_SGI_CYCLE: u32 = 10;
pub const LINUX_CLOCK_TAI: u32 = 11;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_timespec {
    pub tv_sec: linux___kernel_long_t,
    pub tv_nsec: linux___kernel_long_t,
}

// ---------------------------------------------------------------------
// sysinfo.h (struct itself is hand-written directly in sysinfo.rs; only the
// scalar __kernel_* types above are needed from here)
// ---------------------------------------------------------------------

// ---------------------------------------------------------------------
// capability.h (include/uapi/linux/capability.h)
// ---------------------------------------------------------------------

pub const LINUX__LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

// ---------------------------------------------------------------------
// netlink / rtnetlink (include/uapi/linux/netlink.h, rtnetlink.h, if_addr.h,
// if_link.h)
// ---------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_nlmsghdr {
    pub nlmsg_len: u32,
    pub nlmsg_type: u16,
    pub nlmsg_flags: u16,
    pub nlmsg_seq: u32,
    pub nlmsg_pid: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_ifaddrmsg {
    pub ifa_family: u8,
    pub ifa_prefixlen: u8,
    pub ifa_flags: u8,
    pub ifa_scope: u8,
    pub ifa_index: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct linux_ifinfomsg {
    pub ifi_family: u8,
    pub __ifi_pad: u8,
    pub ifi_type: u16,
    pub ifi_index: i32,
    pub ifi_flags: u32,
    pub ifi_change: u32,
}

// ---------------------------------------------------------------------
// auxvec.h (include/uapi/linux/auxvec.h)
// ---------------------------------------------------------------------

pub const LINUX_AT_NULL: u32 = 0;
pub const LINUX_AT_IGNORE: u32 = 1;
pub const LINUX_AT_EXECFD: u32 = 2;
pub const LINUX_AT_PHDR: u32 = 3;
pub const LINUX_AT_PHENT: u32 = 4;
pub const LINUX_AT_PHNUM: u32 = 5;
pub const LINUX_AT_PAGESZ: u32 = 6;
pub const LINUX_AT_BASE: u32 = 7;
pub const LINUX_AT_FLAGS: u32 = 8;
pub const LINUX_AT_ENTRY: u32 = 9;
pub const LINUX_AT_NOTELF: u32 = 10;
pub const LINUX_AT_UID: u32 = 11;
pub const LINUX_AT_EUID: u32 = 12;
pub const LINUX_AT_GID: u32 = 13;
pub const LINUX_AT_EGID: u32 = 14;
pub const LINUX_AT_PLATFORM: u32 = 15;
pub const LINUX_AT_HWCAP: u32 = 16;
pub const LINUX_AT_CLKTCK: u32 = 17;
pub const LINUX_AT_SECURE: u32 = 23;
pub const LINUX_AT_BASE_PLATFORM: u32 = 24;
pub const LINUX_AT_RANDOM: u32 = 25;
pub const LINUX_AT_HWCAP2: u32 = 26;
pub const LINUX_AT_RSEQ_FEATURE_SIZE: u32 = 27;
pub const LINUX_AT_RSEQ_ALIGN: u32 = 28;
pub const LINUX_AT_HWCAP3: u32 = 29;
pub const LINUX_AT_HWCAP4: u32 = 30;
pub const LINUX_AT_EXECFN: u32 = 31;
pub const LINUX_AT_MINSIGSTKSZ: u32 = 51;

// ---------------------------------------------------------------------
// limits.h (include/uapi/linux/limits.h)
// ---------------------------------------------------------------------

pub const LINUX_ARG_MAX: u32 = 131072;
pub const LINUX_NAME_MAX: u32 = 255;
pub const LINUX_PATH_MAX: u32 = 4096;

// ---------------------------------------------------------------------
// Bare unprefixed aliases referenced from lib.rs / posix_types.rs directly.
// ---------------------------------------------------------------------

pub type sigaction = linux_sigaction;
pub type sigset_t = linux_sigset_t;
