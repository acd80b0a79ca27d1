//! Package lists installed before a client build

/// Build dependencies on RHEL-family hosts (on top of "Development Tools")
pub const DEVELOPMENT_TOOLS_RHEL: &[&str] = &[
    "attr",
    "libselinux-devel",
    "expect",
    "sg3_utils",
    "libyaml",
    "libyaml-devel",
    "binutils-devel",
    "python3-netifaces",
    "python3-netaddr",
    "elfutils-libelf-devel",
    "rsync",
    "kernel-rpm-macros",
    "keyutils-libs",
    "keyutils-libs-devel",
    "json-c-devel",
    "libmount-devel",
    "openssl-devel",
];

/// Build dependencies on Ubuntu hosts
pub const DEVELOPMENT_TOOLS_UBUNTU: &[&str] = &[
    "libtool",
    "automake",
    "wget",
    "git",
    "make",
    "dpkg-dev",
    "bc",
    "libselinux-dev",
    "fio",
    "ed",
    "libssl-dev",
    "module-assistant",
    "libreadline-dev",
    "debhelper",
    "dpatch",
    "libsnmp-dev",
    "quilt",
    "rsync",
    "libyaml-dev",
    "build-essential",
    "devscripts",
    "fakeroot",
    "kernel-wedge",
    "libudev-dev",
    "keyutils",
    "libkeyutils1",
    "libkeyutils-dev",
    "krb5-multidev",
    "libgssapi-krb5-2",
    "libkrb5-3",
    "libkrb5-dev",
    "kmod",
    "sg3-utils",
    "attr",
    "lsof",
    "mpi-default-dev",
    "mpi-default-bin",
    "pkg-config",
    "systemd",
    "python2.7",
    "libelf-dev",
    "python3-netaddr",
    "python3-netifaces",
    "libtool-bin",
    "python3-dev",
    "python3-distutils",
    "bison",
    "flex",
    "libjson-c-dev",
    "libmount-dev",
];

/// Extra packages for Ubuntu 20.04 and later
pub const UBUNTU_2X_EXTRAS: &[&str] = &["golang", "libpam0g-dev"];

/// MOFED kernel packages, all required on RHEL
pub const MOFED_RHEL: &[&str] = &["mlnx-ofa_kernel", "kmod-mlnx-ofa_kernel", "mlnx-ofa_kernel-devel"];

/// MOFED kernel packages, any one suffices on Ubuntu
pub const MOFED_UBUNTU: &[&str] = &["mlnx-ofed-kernel-dkms", "mlnx-ofed-kernel-modules"];
