// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

mod test_util;

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use libvirt_xml::{LibvirtXml, VmCpuXml, VmXml};
use log::{info, LevelFilter};
use virsh::{
    DumpXmlFlags, Virsh, VirshCommand, VirshConfig, DEFAULT_VIRSH_BINARY, DEFAULT_VIRSH_TIMEOUT,
};
use virt_harness::{
    cli_print_error_chain, disk_source, disks_to_json, numa_to_json, serial_to_json,
    value_to_json,
};

#[derive(Parser, Debug)]
#[command(
    name = "vmxml",
    version = env!("BUILT_VERSION"),
    about = "Inspect and edit libvirt domain definitions"
)]
struct TopLevel {
    /// libvirt connection URI
    #[arg(long, short = 'c', env = "LIBVIRT_DEFAULT_URI", global = true)]
    connect: Option<String>,

    /// Print structured output
    #[arg(long, global = true)]
    json: bool,

    /// Seconds allowed for each virsh call
    #[arg(long, env = "VIRSH_TIMEOUT", default_value_t = DEFAULT_VIRSH_TIMEOUT, global = true)]
    timeout: u64,

    /// Increase log verbosity, overriding RUST_LOG
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the virsh binary
    #[arg(long, env = "VIRSH", default_value = DEFAULT_VIRSH_BINARY, global = true)]
    virsh: PathBuf,

    #[command(subcommand)]
    command: SubCommandEnum,
}

#[derive(Subcommand, Debug, PartialEq)]
enum SubCommandEnum {
    /// Print the normalized domain XML
    Dump {
        domain: String,
        #[arg(long)]
        inactive: bool,
        #[arg(long)]
        migratable: bool,
        #[arg(long)]
        security_info: bool,
        #[arg(long)]
        update_cpu: bool,
    },
    /// Read a property such as vcpu, max_mem or model
    Get { domain: String, property: String },
    /// Write a property and define the domain
    Set {
        domain: String,
        property: String,
        value: String,
    },
    /// Rename an inactive domain, shutting it down first if needed
    Rename {
        domain: String,
        new_name: String,
        /// Seconds to wait for a graceful shutdown
        #[arg(long, default_value_t = 60)]
        shutdown_timeout: u64,
        /// UUID of the renamed domain, libvirt generates one otherwise
        #[arg(long)]
        uuid: Option<String>,
    },
    /// Set or remove the vCPU count
    SetVcpus {
        domain: String,
        #[arg(required_unless_present = "remove")]
        count: Option<i64>,
        /// Remove the <vcpu> element
        #[arg(long, conflicts_with = "count")]
        remove: bool,
    },
    /// Set the CPU mode: custom, host-model or host-passthrough
    SetCpuMode { domain: String, mode: String },
    /// Configure the first serial device
    SetSerial {
        domain: String,
        /// Source path, removed when omitted
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value = "0")]
        port: String,
        #[arg(long = "type", default_value = "pty")]
        serial_type: String,
    },
    /// Show the first serial device
    Serial { domain: String },
    /// List disks by target device
    Disks { domain: String },
    /// Show NUMA memory tuning
    Numa { domain: String },
    /// List guest CPU features
    Features {
        domain: String,
        /// Report whether the host CPU has each feature
        #[arg(long)]
        check: bool,
    },
}

fn init_logger(verbose: u8) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    let level = match verbose {
        0 => None,
        1 => Some(LevelFilter::Info),
        2 => Some(LevelFilter::Debug),
        _ => Some(LevelFilter::Trace),
    };
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.init();
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load(virsh: &dyn Virsh, domain: &str) -> anyhow::Result<VmXml> {
    VmXml::new_from_dumpxml(virsh, domain)
        .with_context(|| format!("Failed to load domain {domain}"))
}

fn run(toplevel: &TopLevel) -> anyhow::Result<()> {
    let virsh = VirshCommand::new(VirshConfig {
        binary: toplevel.virsh.clone(),
        uri: toplevel.connect.clone(),
        timeout: Duration::from_secs(toplevel.timeout),
    });
    let json = toplevel.json;

    match &toplevel.command {
        SubCommandEnum::Dump {
            domain,
            inactive,
            migratable,
            security_info,
            update_cpu,
        } => {
            let mut flags = DumpXmlFlags::empty();
            flags.set(DumpXmlFlags::INACTIVE, *inactive);
            flags.set(DumpXmlFlags::MIGRATABLE, *migratable);
            flags.set(DumpXmlFlags::SECURITY_INFO, *security_info);
            flags.set(DumpXmlFlags::UPDATE_CPU, *update_cpu);
            let xml = virsh.dumpxml(domain, flags)?;
            let vmxml = VmXml::from_xml(&xml)
                .with_context(|| format!("Failed to parse definition of {domain}"))?;
            if json {
                print_json(&serde_json::json!({ "xml": vmxml.xml() }))?;
            } else {
                println!("{vmxml}");
            }
        }
        SubCommandEnum::Get { domain, property } => {
            let cpuxml = VmCpuXml::from(load(&virsh, domain)?);
            let value = cpuxml
                .get(property)
                .with_context(|| format!("Failed to read {property} of {domain}"))?;
            if json {
                print_json(&value_to_json(&value))?;
            } else {
                println!("{value}");
            }
        }
        SubCommandEnum::Set {
            domain,
            property,
            value,
        } => {
            let mut cpuxml = VmCpuXml::from(load(&virsh, domain)?);
            cpuxml
                .set_str(property, value)
                .with_context(|| format!("Failed to set {property} of {domain}"))?;
            cpuxml.define(&virsh)?;
            info!("Set {property} of {domain} to {value}");
        }
        SubCommandEnum::Rename {
            domain,
            new_name,
            shutdown_timeout,
            uuid,
        } => {
            let vmxml = VmXml::vm_rename(
                &virsh,
                domain,
                new_name,
                uuid.as_deref(),
                Duration::from_secs(*shutdown_timeout),
            )
            .with_context(|| format!("Failed to rename {domain} to {new_name}"))?;
            let name = vmxml.vm_name()?;
            if json {
                print_json(&serde_json::json!({ "name": name }))?;
            } else {
                println!("{name}");
            }
        }
        SubCommandEnum::SetVcpus {
            domain,
            count,
            remove,
        } => {
            let count = if *remove { None } else { *count };
            VmXml::set_vm_vcpus(&virsh, domain, count)
                .with_context(|| format!("Failed to set vCPUs of {domain}"))?;
        }
        SubCommandEnum::SetCpuMode { domain, mode } => {
            VmXml::set_cpu_mode(&virsh, domain, mode)
                .with_context(|| format!("Failed to set CPU mode of {domain}"))?;
        }
        SubCommandEnum::SetSerial {
            domain,
            path,
            port,
            serial_type,
        } => {
            VmXml::set_primary_serial(&virsh, domain, serial_type, port, path.as_deref())
                .with_context(|| format!("Failed to set the serial device of {domain}"))?;
        }
        SubCommandEnum::Serial { domain } => {
            let serial = load(&virsh, domain)?.get_primary_serial()?;
            if json {
                print_json(&serial_to_json(&serial))?;
            } else {
                println!(
                    "{} {} {}",
                    serial.serial_type,
                    serial.port.as_deref().unwrap_or("-"),
                    serial.path.as_deref().unwrap_or("-")
                );
            }
        }
        SubCommandEnum::Disks { domain } => {
            let vmxml = load(&virsh, domain)?;
            let disks = vmxml.get_disk_all();
            if json {
                print_json(&disks_to_json(&disks))?;
            } else {
                for (target, disk) in &disks {
                    println!("{target} {}", disk_source(disk).unwrap_or("-"));
                }
            }
        }
        SubCommandEnum::Numa { domain } => {
            let numa = load(&virsh, domain)?.get_numa_params();
            if json {
                print_json(&numa_to_json(&numa))?;
            } else {
                println!(
                    "{} {}",
                    numa.mode.as_deref().unwrap_or("-"),
                    numa.nodeset.as_deref().unwrap_or("-")
                );
            }
        }
        SubCommandEnum::Features { domain, check } => {
            let xml = virsh.dumpxml(domain, DumpXmlFlags::UPDATE_CPU)?;
            let cpuxml = VmCpuXml::from_xml(&xml)
                .with_context(|| format!("Failed to parse definition of {domain}"))?;
            let mut features = Vec::new();
            for index in 0..cpuxml.feature_count() {
                let Some(name) = cpuxml.get_feature_name(index)? else {
                    continue;
                };
                let on_host = if *check {
                    Some(cpuxml.check_feature_name(name)?)
                } else {
                    None
                };
                features.push((name, on_host));
            }
            if json {
                let list: Vec<_> = features
                    .iter()
                    .map(|(name, on_host)| serde_json::json!({ "name": name, "host": on_host }))
                    .collect();
                print_json(&list.into())?;
            } else {
                for (name, on_host) in features {
                    match on_host {
                        Some(true) => println!("{name} host"),
                        Some(false) => println!("{name} missing"),
                        None => println!("{name}"),
                    }
                }
            }
        }
    }
    Ok(())
}

fn main() {
    let toplevel = TopLevel::parse();
    init_logger(toplevel.verbose);

    if let Err(e) = run(&toplevel) {
        cli_print_error_chain(&*e, "vmxml");
        process::exit(1);
    }
}
