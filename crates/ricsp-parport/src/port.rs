//! Raw port register access
//!
//! Two Linux backends sit behind [`PortHandle`]: the `ppdev` character
//! device (`/dev/parportN`, works for any user who owns the device node) and
//! raw `/dev/port` access at a fixed I/O base for setups without the ppdev
//! module. Other platforms get a stub whose constructors always fail, so the
//! crate still builds there.

#[cfg(target_os = "linux")]
mod imp {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::unix::fs::FileExt;
    use std::os::unix::io::AsRawFd;

    use crate::error::{ParportError, Result};
    use crate::pins::Register;

    /// ppdev ioctl requests, from `linux/ppdev.h`
    ///
    /// The numbers follow the kernel's encoding:
    /// `_IOC(dir, type, nr, size) = (dir << 30) | (size << 16) | (type << 8) | nr`
    /// with the ppdev magic `'p'` (0x70) and single-byte transfers.
    mod ppdev {
        const PP_IOCTL: u64 = 0x70;

        const fn pp_io(nr: u64) -> u64 {
            (PP_IOCTL << 8) | nr
        }

        const fn pp_ior(nr: u64) -> u64 {
            (2 << 30) | (1 << 16) | (PP_IOCTL << 8) | nr
        }

        const fn pp_iow(nr: u64) -> u64 {
            (1 << 30) | (1 << 16) | (PP_IOCTL << 8) | nr
        }

        pub const PPRSTATUS: u64 = pp_ior(0x81);
        pub const PPRCONTROL: u64 = pp_ior(0x83);
        pub const PPWCONTROL: u64 = pp_iow(0x84);
        pub const PPRDATA: u64 = pp_ior(0x85);
        pub const PPWDATA: u64 = pp_iow(0x86);
        pub const PPCLAIM: u64 = pp_io(0x8b);
        pub const PPRELEASE: u64 = pp_io(0x8c);
        pub const PPEXCL: u64 = pp_io(0x8f);
    }

    /// An open, claimed parallel port
    #[derive(Debug)]
    pub enum PortHandle {
        /// ppdev character device
        Ppdev { file: File, path: String },
        /// Raw port I/O through `/dev/port`; registers live at
        /// `base + Register as u64`
        DevPort { file: File, base: u16 },
    }

    impl PortHandle {
        /// Open `/dev/parportN` and claim it
        pub fn open_ppdev(path: &str) -> Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|source| ParportError::OpenFailed {
                    path: path.to_string(),
                    source,
                })?;
            let fd = file.as_raw_fd();

            // Exclusive mode keeps lp and friends off the port while we bang
            // on it. The ioctl is advisory and fails on kernels without it.
            if unsafe { libc::ioctl(fd, ppdev::PPEXCL as _) } < 0 {
                log::warn!(
                    "parport: PPEXCL on {} failed: {}",
                    path,
                    io::Error::last_os_error()
                );
            }
            if unsafe { libc::ioctl(fd, ppdev::PPCLAIM as _) } < 0 {
                return Err(ParportError::ClaimFailed {
                    path: path.to_string(),
                    source: io::Error::last_os_error(),
                });
            }
            Ok(PortHandle::Ppdev {
                file,
                path: path.to_string(),
            })
        }

        /// Open `/dev/port` for raw register access at `base`
        pub fn open_io(base: u16) -> Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open("/dev/port")
                .map_err(|source| ParportError::OpenFailed {
                    path: "/dev/port".to_string(),
                    source,
                })?;
            Ok(PortHandle::DevPort { file, base })
        }

        pub fn read(&self, reg: Register) -> io::Result<u8> {
            match self {
                PortHandle::Ppdev { file, .. } => {
                    let request = match reg {
                        Register::Data => ppdev::PPRDATA,
                        Register::Status => ppdev::PPRSTATUS,
                        Register::Control => ppdev::PPRCONTROL,
                    };
                    let mut value: u8 = 0;
                    if unsafe {
                        libc::ioctl(file.as_raw_fd(), request as _, &mut value as *mut u8)
                    } < 0
                    {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(value)
                }
                PortHandle::DevPort { file, base } => {
                    let mut buf = [0u8; 1];
                    file.read_at(&mut buf, u64::from(*base) + reg as u64)?;
                    Ok(buf[0])
                }
            }
        }

        pub fn write(&self, reg: Register, value: u8) -> io::Result<()> {
            match self {
                PortHandle::Ppdev { file, .. } => {
                    let request = match reg {
                        Register::Data => ppdev::PPWDATA,
                        Register::Control => ppdev::PPWCONTROL,
                        Register::Status => {
                            return Err(io::Error::new(
                                io::ErrorKind::Unsupported,
                                "status register is read-only",
                            ));
                        }
                    };
                    if unsafe {
                        libc::ioctl(file.as_raw_fd(), request as _, &value as *const u8)
                    } < 0
                    {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                }
                PortHandle::DevPort { file, base } => {
                    file.write_at(&[value], u64::from(*base) + reg as u64)?;
                    Ok(())
                }
            }
        }
    }

    impl Drop for PortHandle {
        fn drop(&mut self) {
            if let PortHandle::Ppdev { file, path } = self {
                if unsafe { libc::ioctl(file.as_raw_fd(), ppdev::PPRELEASE as _) } < 0 {
                    log::warn!(
                        "parport: PPRELEASE on {} failed: {}",
                        path,
                        io::Error::last_os_error()
                    );
                }
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use std::io;

    use crate::error::{ParportError, Result};
    use crate::pins::Register;

    /// Stub so the crate links on non-Linux hosts; opening always fails.
    #[derive(Debug)]
    pub struct PortHandle(());

    impl PortHandle {
        pub fn open_ppdev(_path: &str) -> Result<Self> {
            Err(ParportError::Unsupported)
        }

        pub fn open_io(_base: u16) -> Result<Self> {
            Err(ParportError::Unsupported)
        }

        pub fn read(&self, _reg: Register) -> io::Result<u8> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }

        pub fn write(&self, _reg: Register, _value: u8) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }
    }
}

pub(crate) use imp::PortHandle;
