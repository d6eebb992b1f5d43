//! 宿主服务器句柄。
//!
//! 应用在 `start` 时收到该句柄并只保存一个弱引用，句柄的生命周期由宿主掌握。

use chrono::{DateTime, Local};
use std::net::SocketAddrV4;

use crate::param::SERVER_NAME;

#[derive(Debug)]
pub struct ServerHandle {
    name: String,
    address: SocketAddrV4,
    base_path: String,
    development: bool,
    started_at: DateTime<Local>,
}

impl ServerHandle {
    pub fn new(address: SocketAddrV4, base_path: &str, development: bool) -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            address,
            base_path: base_path.to_string(),
            development,
            started_at: Local::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> SocketAddrV4 {
        self.address
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn development(&self) -> bool {
        self.development
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_server_handle_fields() {
        let address = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7878);
        let server = ServerHandle::new(address, "/app", true);

        assert_eq!(server.name(), "shaneyale-webserver");
        assert_eq!(server.address().port(), 7878);
        assert_eq!(server.base_path(), "/app");
        assert!(server.development());
        assert!(server.started_at() <= Local::now());
    }
}
