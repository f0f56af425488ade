//! Mapping between the running host's `std::env::consts` strings and the
//! `OS-CPU` vocabulary feeds use (spec.md §3 Architecture).

use zeroinstall_schema::{Architecture, Cpu, Os};

/// Translate `std::env::consts::OS` into the feed vocabulary's [`Os`].
fn os_from_consts(os: &str) -> Os {
    match os {
        "linux" => Os::Linux,
        "macos" => Os::MacOSX,
        "windows" => Os::Windows,
        "freebsd" => Os::FreeBSD,
        "solaris" => Os::Solaris,
        other => Os::Other(other.to_owned()),
    }
}

/// Translate `std::env::consts::ARCH` into the feed vocabulary's [`Cpu`].
fn cpu_from_consts(arch: &str) -> Cpu {
    match arch {
        "x86_64" => Cpu::X86_64,
        "x86" => Cpu::I686,
        "arm" => Cpu::Armv6l,
        "aarch64" => Cpu::Arm64,
        "powerpc" => Cpu::Ppc,
        "powerpc64" => Cpu::Ppc64,
        other => Cpu::Other(other.to_owned()),
    }
}

/// The architecture of the machine this process is running on, used as
/// the default host constraint when no `Requirements::architecture` is
/// supplied explicitly (spec.md §4.7 step 1).
pub fn host_architecture() -> Architecture {
    Architecture::new(
        os_from_consts(std::env::consts::OS),
        cpu_from_consts(std::env::consts::ARCH),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_os_strings() {
        assert_eq!(os_from_consts("linux"), Os::Linux);
        assert_eq!(os_from_consts("macos"), Os::MacOSX);
        assert_eq!(os_from_consts("windows"), Os::Windows);
    }

    #[test]
    fn unknown_os_falls_back_to_other() {
        assert_eq!(os_from_consts("plan9"), Os::Other("plan9".to_owned()));
    }

    #[test]
    fn maps_known_cpu_strings() {
        assert_eq!(cpu_from_consts("x86_64"), Cpu::X86_64);
        assert_eq!(cpu_from_consts("aarch64"), Cpu::Arm64);
    }

    #[test]
    fn host_architecture_is_never_wildcard() {
        let arch = host_architecture();
        assert_ne!(arch.os, Os::Any);
        assert_ne!(arch.cpu, Cpu::Any);
    }
}
