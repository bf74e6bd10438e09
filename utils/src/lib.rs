use std::net::{Ipv4Addr, UdpSocket};
use std::process::Command;

use rand::Rng;
use uuid::Uuid;

pub fn uuid() -> String {
    Uuid::new_v4().to_string()
}

pub fn rand_i32() -> i32 {
    let mut rng = rand::thread_rng();
    let n: i32 = rng.gen();
    n
}

pub fn rand_number(n: usize) -> String {
    rand::thread_rng()
        .gen_range(10usize.pow(n as u32 - 1)..10usize.pow(n as u32) - 1)
        .to_string()
}

pub fn get_local_ip() -> Option<String> {
    let output = match Command::new("hostname").args(["-I"]).output() {
        Ok(ok) => ok,
        Err(_) => {
            return None;
        }
    };

    let stdout = match String::from_utf8(output.stdout) {
        Ok(ok) => ok,
        Err(_) => {
            return None;
        }
    };

    let ips: Vec<&str> = stdout.trim().split(' ').collect::<Vec<&str>>();
    match ips.first() {
        Some(first) if !first.is_empty() => Some(first.to_string()),
        _ => None,
    }
}

/// Local address used for media registration, falling back to loopback
/// when the host address can't be determined.
pub fn local_media_ip() -> Ipv4Addr {
    get_local_ip()
        .and_then(|ip| ip.parse().ok())
        .unwrap_or(Ipv4Addr::LOCALHOST)
}

/// Asks the OS for a free UDP port by binding and immediately releasing a
/// socket. The port is only a hint, another process may claim it first.
pub fn ephemeral_udp_port() -> std::io::Result<u16> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    let port = socket.local_addr()?.port();
    Ok(port)
}
