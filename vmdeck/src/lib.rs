//! vmdeck: session façade for managing virtual machines over libvirt.
//!
//! The crate centers on [`Session`], one logical connection to a hypervisor
//! daemon that translates high-level intents ("start VM web01") into daemon
//! calls and normalizes daemon faults into a small result taxonomy. The
//! daemon sits behind the [`hypervisor::Hypervisor`] trait; production code
//! uses the libvirt implementation, tests use [`mock::MockHypervisor`].
//!
//! ```no_run
//! use vmdeck::{Session, VmAction, VmFilter};
//!
//! let mut session: Session = Session::new("qemu:///system");
//! session.connect()?;
//! for vm in session.list(VmFilter::All) {
//!     println!("{} ({})", vm.name, vm.state);
//! }
//! session.perform("web01", VmAction::Start)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

mod descriptor;
mod error;
pub mod hypervisor;
mod libvirt;
pub mod mock;
mod session;
mod settings;
mod types;

pub use descriptor::{BootDevice, DiskFormat, DiskSpec, Graphics, NetworkSpec, VmDescriptor};
pub use error::{ActionError, ConnectionError, DefineError};
pub use libvirt::Libvirt;
pub use session::Session;
pub use settings::Settings;
pub use types::{VmAction, VmDetail, VmFilter, VmState, VmSummary};

/// Connection URI used when neither the caller nor the settings store names
/// one.
pub const DEFAULT_URI: &str = "qemu:///system";
