//! Test doubles shared by unit tests

use crate::catalog::{InterfaceCatalog, InterfaceClass, InterfaceDescriptor};
use crate::net::parse_ipv4;
use crate::platform::{CommandChannel, CommandOutcome};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

const HEREDOC_START: &str = "<<'GW_ROUTES_EOF'";
const HEREDOC_END: &str = "GW_ROUTES_EOF";

/// A command channel that behaves like a small kernel routing table.
///
/// - `ip route add R` fails with "File exists" when `R` is present
/// - `ip route del R` removes exactly `R`, else "No such process"
/// - `ip route show [TARGET] dev D` lists matching routes
/// - heredoc writes are captured as files
///
/// Canned responses take priority over all of the above.
#[derive(Default)]
pub struct FakeRouter {
    routes: Mutex<Vec<String>>,
    commands: Mutex<Vec<String>>,
    files: Mutex<HashMap<String, String>>,
    responses: Mutex<HashMap<String, CommandOutcome>>,
    fail_adds: AtomicBool,
    fail_writes: AtomicBool,
}

impl FakeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, command: &str, output: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), CommandOutcome::ok(output));
    }

    pub fn respond_failure(&self, command: &str, output: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), CommandOutcome::failed(output));
    }

    pub fn fail_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn install_route(&self, route: &str) {
        self.routes.lock().unwrap().push(route.to_string());
    }

    pub fn routes(&self) -> Vec<String> {
        self.routes.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().unwrap().clear();
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    fn handle(&self, command: &str) -> CommandOutcome {
        if let Some(outcome) = self.responses.lock().unwrap().get(command) {
            return outcome.clone();
        }

        if command.contains(HEREDOC_START) {
            return self.write_file(command);
        }

        if let Some(route) = command.strip_prefix("ip route add ") {
            if self.fail_adds.load(Ordering::SeqCst) {
                return CommandOutcome::failed("RTNETLINK answers: Operation not permitted");
            }
            let mut routes = self.routes.lock().unwrap();
            if routes.iter().any(|existing| existing == route) {
                return CommandOutcome::failed("RTNETLINK answers: File exists");
            }
            routes.push(route.to_string());
            return CommandOutcome::ok("");
        }

        if let Some(route) = command.strip_prefix("ip route del ") {
            let mut routes = self.routes.lock().unwrap();
            return match routes.iter().position(|existing| existing == route) {
                Some(index) => {
                    routes.remove(index);
                    CommandOutcome::ok("")
                }
                None => CommandOutcome::failed("RTNETLINK answers: No such process"),
            };
        }

        if let Some(rest) = command.strip_prefix("ip route show ") {
            let Some((target, device)) = rest.split_once("dev ") else {
                return CommandOutcome::ok(self.routes().join("\n"));
            };
            let target = target.trim();
            let suffix = format!(" dev {}", device.trim());
            let listed: Vec<String> = self
                .routes()
                .into_iter()
                .filter(|route| route.ends_with(&suffix))
                .filter(|route| target.is_empty() || route.starts_with(&format!("{} ", target)))
                .collect();
            return CommandOutcome::ok(listed.join("\n"));
        }

        CommandOutcome::ok("")
    }

    fn write_file(&self, command: &str) -> CommandOutcome {
        if self.fail_writes.load(Ordering::SeqCst) {
            return CommandOutcome::failed("sh: can't create: Read-only file system");
        }
        let Some((header, body)) = command.split_once('\n') else {
            return CommandOutcome::failed("malformed heredoc");
        };
        let path = header
            .split_once("cat > ")
            .and_then(|(_, rest)| rest.split_once(" <<"))
            .map(|(path, _)| path.trim_matches('\''))
            .unwrap_or_default();
        let content = body
            .rfind(HEREDOC_END)
            .map(|end| &body[..end])
            .unwrap_or(body);
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
        CommandOutcome::ok("")
    }
}

impl CommandChannel for FakeRouter {
    async fn run(&self, command: &str) -> CommandOutcome {
        self.commands.lock().unwrap().push(command.to_string());
        self.handle(command)
    }
}

/// LAN 1, LAN 2, a VPN with a gateway, a VPN without, and a VLAN
pub fn sample_catalog() -> InterfaceCatalog {
    let entry = |label: &str, device: &str, ip: &str, mask: Option<&str>, gateway: Option<&str>, class| {
        InterfaceDescriptor {
            label: label.to_string(),
            device_name: device.to_string(),
            ip: Some(parse_ipv4(ip).unwrap()),
            mask: mask.map(str::to_string),
            gateway: gateway.map(|gw| parse_ipv4(gw).unwrap()),
            class,
        }
    };

    InterfaceCatalog::new(vec![
        entry("Lan 1:192.168.1.101", "eth0", "192.168.1.101", Some("255.255.255.0"), None, InterfaceClass::Lan),
        entry("Lan 2:10.20.0.2", "eth1", "10.20.0.2", Some("255.255.0.0"), None, InterfaceClass::Lan),
        entry(
            "VPN:172.23.0.5 (vpn_vpn)",
            "vpn_vpn",
            "172.23.0.5",
            Some("255.255.255.0"),
            Some("172.23.0.1"),
            InterfaceClass::Vpn,
        ),
        entry("VPN:172.24.0.9 (tun0)", "tun0", "172.24.0.9", None, None, InterfaceClass::Vpn),
        entry(
            "VLAN:10.0.5.2 (eth0.5)",
            "eth0.5",
            "10.0.5.2",
            Some("255.255.255.0"),
            Some("10.0.5.1"),
            InterfaceClass::Vlan,
        ),
    ])
}
