//! Sockets behind the file API
//!
//! Wraps a socket in a `File` so descriptor-based read/write/poll/close
//! work on it like on any other open file. The socket rides in the
//! anonymous inode's private data.

use alloc::string::String;
use alloc::sync::{Arc, Weak};

use super::socket::{self, Socket};
use crate::fs::dentry::Dentry;
use crate::fs::file::{File, FileOps, flags};
use crate::fs::inode::{AsAny, Inode, InodeData, InodeMode, InodeOps};
use crate::poll::{POLL_IN_EVENTS, POLL_OUT_EVENTS, POLLERR, POLLHUP, PollTable};
use crate::{KernelError, KernelResult};

struct SocketData {
    socket: Arc<Socket>,
}

impl AsAny for SocketData {
    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

impl InodeData for SocketData {}

fn socket_of(file: &File) -> KernelResult<Arc<Socket>> {
    let inode = file.get_inode().ok_or(KernelError::NotSocket)?;
    let private = inode.get_private().ok_or(KernelError::NotSocket)?;
    let data = private
        .as_any()
        .downcast_ref::<SocketData>()
        .ok_or(KernelError::NotSocket)?;
    Ok(data.socket.clone())
}

/// The socket behind an open file, for socket-specific calls on a descriptor
pub fn file_socket(file: &File) -> KernelResult<Arc<Socket>> {
    socket_of(file)
}

struct SocketInodeOps;

impl InodeOps for SocketInodeOps {
    fn lookup(&self, _dir: &Inode, _name: &str) -> KernelResult<Arc<Inode>> {
        Err(KernelError::NotDirectory)
    }
}

static SOCKET_INODE_OPS: SocketInodeOps = SocketInodeOps;

/// File operations over a socket
pub struct SocketFileOps;

impl FileOps for SocketFileOps {
    fn as_any(&self) -> &dyn core::any::Any {
        self
    }

    fn read(&self, file: &File, buf: &mut [u8]) -> KernelResult<usize> {
        let sock = socket_of(file)?;
        let (n, _from) = sock.ops().recvmsg(&sock, buf)?;
        Ok(n)
    }

    fn write(&self, file: &File, buf: &[u8]) -> KernelResult<usize> {
        let sock = socket_of(file)?;
        sock.ops().sendmsg(&sock, buf, None)
    }

    fn llseek(&self, _file: &File, _offset: i64, _whence: i32) -> KernelResult<u64> {
        Err(KernelError::IllegalSeek)
    }

    fn release(&self, file: &File) {
        if let Ok(sock) = socket_of(file) {
            socket::socket_release(&sock);
        }
    }

    fn poll(&self, file: &File, pt: Option<&mut PollTable>) -> u16 {
        let Ok(sock) = socket_of(file) else {
            return POLLERR;
        };
        if let Some(pt) = pt {
            pt.poll_wait(sock.rx_wait());
        }
        let mut mask = POLL_OUT_EVENTS;
        if sock.poll_read() {
            mask |= POLL_IN_EVENTS;
        }
        if sock.is_eof() {
            mask |= POLLHUP;
        }
        mask
    }
}

pub static SOCKET_FILE_OPS: SocketFileOps = SocketFileOps;

/// Wrap a socket in an open file
pub fn socket_file(socket: Arc<Socket>) -> Arc<File> {
    let inode = Arc::new(Inode::new(
        0,
        InodeMode::socket(),
        Weak::new(),
        &SOCKET_INODE_OPS,
    ));
    inode.set_private(Arc::new(SocketData { socket }));
    let dentry = Arc::new(Dentry::new_anonymous(String::from("socket"), Some(inode)));
    File::new(dentry, flags::O_RDWR, &SOCKET_FILE_OPS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::TEST_NET_LOCK;
    use crate::net::ipv4::Ipv4Addr;
    use crate::net::socket::{AddressFamily, SocketType};
    use crate::poll::POLLIN;

    #[test]
    fn read_drains_delivered_datagram() {
        let _g = TEST_NET_LOCK.lock();
        let sock = Socket::new(AddressFamily::Inet, SocketType::Dgram, 0);
        let file = socket_file(sock.clone());

        sock.deliver_datagram(Ipv4Addr::new(10, 0, 2, 2), 9000, b"ping");

        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf), Ok(4));
        assert_eq!(&buf[..4], b"ping");
    }

    #[test]
    fn write_without_destination_is_rejected() {
        let _g = TEST_NET_LOCK.lock();
        let sock = Socket::new(AddressFamily::Inet, SocketType::Dgram, 0);
        let file = socket_file(sock);
        assert_eq!(file.write(b"x"), Err(KernelError::DestAddrRequired));
    }

    #[test]
    fn poll_reflects_queue_state() {
        let _g = TEST_NET_LOCK.lock();
        let sock = Socket::new(AddressFamily::Inet, SocketType::Dgram, 0);
        let file = socket_file(sock.clone());

        let mask = file.f_op.poll(&file, None);
        assert_eq!(mask & POLLIN, 0);
        assert_ne!(mask & POLL_OUT_EVENTS, 0);

        sock.deliver_datagram(Ipv4Addr::new(10, 0, 2, 2), 1, b"x");
        let mask = file.f_op.poll(&file, None);
        assert_ne!(mask & POLLIN, 0);
    }
}
