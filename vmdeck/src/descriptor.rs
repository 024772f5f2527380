//! Declarative description of a new domain, rendered to libvirt domain XML.
//!
//! The descriptor only registers the definition; backing disk images must
//! already exist on the host. Defining a domain whose disk path is missing
//! succeeds at the daemon, the domain just fails to boot later.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BootDevice {
    Hd,
    Cdrom,
    Network,
}

impl BootDevice {
    fn as_str(&self) -> &'static str {
        match self {
            BootDevice::Hd => "hd",
            BootDevice::Cdrom => "cdrom",
            BootDevice::Network => "network",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    Qcow2,
    Raw,
}

impl DiskFormat {
    fn as_str(&self) -> &'static str {
        match self {
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Raw => "raw",
        }
    }
}

/// One virtual disk backed by an existing image file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DiskSpec {
    pub path: String,
    pub format: DiskFormat,
}

impl DiskSpec {
    pub fn new(path: impl Into<String>, format: DiskFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

/// One NIC attached to a named libvirt network.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub network: String,
}

impl NetworkSpec {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
        }
    }
}

/// Display/console transport for the guest.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Graphics {
    Spice,
    Vnc,
}

/// Everything the daemon needs to register a new domain.
///
/// The constructor takes the primary disk, so a descriptor without at least
/// one disk cannot be built. A guest with no explicit network attachment is
/// wired to the `default` network.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VmDescriptor {
    pub name: String,
    pub uuid: Uuid,
    pub vcpus: u32,
    pub memory_kib: u64,
    pub boot: BootDevice,
    pub disks: Vec<DiskSpec>,
    pub networks: Vec<NetworkSpec>,
    pub graphics: Graphics,
}

impl VmDescriptor {
    pub fn new(name: &str, vcpus: u32, memory_kib: u64, primary_disk: DiskSpec) -> Self {
        Self {
            name: String::from(name),
            uuid: Uuid::new_v4(),
            vcpus,
            memory_kib,
            boot: BootDevice::Hd,
            disks: vec![primary_disk],
            networks: vec![],
            graphics: Graphics::Spice,
        }
    }

    pub fn boot_from(mut self, dev: BootDevice) -> Self {
        self.boot = dev;
        self
    }

    pub fn with_disk(mut self, disk: DiskSpec) -> Self {
        self.disks.push(disk);
        self
    }

    pub fn with_network(mut self, net: NetworkSpec) -> Self {
        self.networks.push(net);
        self
    }

    pub fn with_graphics(mut self, graphics: Graphics) -> Self {
        self.graphics = graphics;
        self
    }

    /// Render the libvirt domain XML.
    pub fn to_xml(&self) -> Result<String, quick_xml::Error> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        // <domain type=kvm>
        let mut domain = BytesStart::new("domain");
        domain.push_attribute(("type", "kvm"));
        writer.write_event(Event::Start(domain))?;

        writer
            .create_element("name")
            .write_text_content(BytesText::new(&self.name))?;

        writer
            .create_element("uuid")
            .write_text_content(BytesText::new(&self.uuid.to_string()))?;

        writer
            .create_element("memory")
            .with_attribute(("unit", "KiB"))
            .write_text_content(BytesText::new(&self.memory_kib.to_string()))?;

        writer
            .create_element("vcpu")
            .write_text_content(BytesText::new(&self.vcpus.to_string()))?;

        // <os>
        //  <type arch=x86_64 machine=q35>hvm</type>
        //  <boot dev=... />
        // </os>
        writer
            .create_element("os")
            .write_inner_content::<_, quick_xml::Error>(|writer| {
                writer
                    .create_element("type")
                    .with_attributes([("arch", "x86_64"), ("machine", "q35")])
                    .write_text_content(BytesText::new("hvm"))?;

                writer
                    .create_element("boot")
                    .with_attribute(("dev", self.boot.as_str()))
                    .write_empty()?;

                Ok(())
            })?;

        writer
            .create_element("devices")
            .write_inner_content::<_, quick_xml::Error>(|writer| {
                for (i, disk) in self.disks.iter().enumerate() {
                    // vda, vdb, ... in declaration order
                    let target = format!("vd{}", (b'a' + i as u8) as char);

                    writer
                        .create_element("disk")
                        .with_attributes([("type", "file"), ("device", "disk")])
                        .write_inner_content::<_, quick_xml::Error>(|writer| {
                            writer
                                .create_element("driver")
                                .with_attributes([("name", "qemu"), ("type", disk.format.as_str())])
                                .write_empty()?;

                            writer
                                .create_element("source")
                                .with_attribute(("file", disk.path.as_str()))
                                .write_empty()?;

                            writer
                                .create_element("target")
                                .with_attributes([("dev", target.as_str()), ("bus", "virtio")])
                                .write_empty()?;

                            Ok(())
                        })?;
                }

                // Every guest gets at least one NIC.
                let default_net = [NetworkSpec::new("default")];
                let networks = if self.networks.is_empty() {
                    &default_net[..]
                } else {
                    &self.networks[..]
                };

                for net in networks {
                    writer
                        .create_element("interface")
                        .with_attribute(("type", "network"))
                        .write_inner_content::<_, quick_xml::Error>(|writer| {
                            writer
                                .create_element("source")
                                .with_attribute(("network", net.network.as_str()))
                                .write_empty()?;

                            writer
                                .create_element("model")
                                .with_attribute(("type", "virtio"))
                                .write_empty()?;

                            Ok(())
                        })?;
                }

                writer
                    .create_element("console")
                    .with_attribute(("type", "pty"))
                    .write_empty()?;

                // Absolute cursor movement for graphical consoles
                writer
                    .create_element("input")
                    .with_attributes([("type", "tablet"), ("bus", "usb")])
                    .write_empty()?;

                match self.graphics {
                    Graphics::Spice => writer
                        .create_element("graphics")
                        .with_attributes([
                            ("type", "spice"),
                            ("port", "-1"),
                            ("tlsPort", "-1"),
                            ("autoport", "yes"),
                        ])
                        .write_empty()?,
                    Graphics::Vnc => writer
                        .create_element("graphics")
                        .with_attributes([("type", "vnc"), ("port", "-1"), ("autoport", "yes")])
                        .write_empty()?,
                };

                Ok(())
            })?;

        writer.write_event(Event::End(BytesEnd::new("domain")))?;
        let xml = writer.into_inner().into_inner();
        Ok(String::from_utf8(xml).expect("writer produced valid utf-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> VmDescriptor {
        VmDescriptor::new(
            "web01",
            2,
            2 * 1024 * 1024,
            DiskSpec::new("/var/lib/libvirt/images/web01.qcow2", DiskFormat::Qcow2),
        )
    }

    #[test]
    fn xml_carries_identity_and_sizing() {
        let desc = descriptor();
        let xml = desc.to_xml().unwrap();

        assert!(xml.starts_with("<domain type=\"kvm\">"));
        assert!(xml.contains("<name>web01</name>"));
        assert!(xml.contains(&format!("<uuid>{}</uuid>", desc.uuid)));
        assert!(xml.contains("<memory unit=\"KiB\">2097152</memory>"));
        assert!(xml.contains("<vcpu>2</vcpu>"));
        assert!(xml.contains("<boot dev=\"hd\"/>"));
    }

    #[test]
    fn disks_get_sequential_virtio_targets() {
        let xml = descriptor()
            .with_disk(DiskSpec::new("/tmp/data.raw", DiskFormat::Raw))
            .to_xml()
            .unwrap();

        assert!(xml.contains("<source file=\"/var/lib/libvirt/images/web01.qcow2\"/>"));
        assert!(xml.contains("<target dev=\"vda\" bus=\"virtio\"/>"));
        assert!(xml.contains("<driver name=\"qemu\" type=\"raw\"/>"));
        assert!(xml.contains("<target dev=\"vdb\" bus=\"virtio\"/>"));
    }

    #[test]
    fn guest_without_explicit_network_joins_default() {
        let xml = descriptor().to_xml().unwrap();
        assert!(xml.contains("<source network=\"default\"/>"));

        let xml = descriptor()
            .with_network(NetworkSpec::new("lan0"))
            .to_xml()
            .unwrap();
        assert!(xml.contains("<source network=\"lan0\"/>"));
        assert!(!xml.contains("<source network=\"default\"/>"));
    }

    #[test]
    fn graphics_transport_is_selectable() {
        let spice = descriptor().to_xml().unwrap();
        assert!(spice.contains("<graphics type=\"spice\""));

        let vnc = descriptor().with_graphics(Graphics::Vnc).to_xml().unwrap();
        assert!(vnc.contains("<graphics type=\"vnc\" port=\"-1\" autoport=\"yes\"/>"));
    }
}
