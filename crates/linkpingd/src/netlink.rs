//! Kernel link-notification socket
//!
//! Owns the NETLINK_ROUTE socket subscribed to the link multicast group.
//! The dump request and all decoding go through [`crate::link`]; this module
//! only moves datagrams. On non-Linux platforms a mock implementation backs
//! development and testing.

#[cfg(target_os = "linux")]
mod linux {
    use crate::error::{LinkpingError, Result};
    use crate::link::{self, LinkEvent, RTMGRP_LINK};
    use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
    use std::os::fd::AsRawFd;
    use tokio::io::unix::AsyncFd;
    use tracing::{debug, warn};

    /// Receive buffer size; a full link dump fits comfortably
    const RECV_BUFFER_SIZE: usize = 256 * 1024;

    /// Kernel-side socket receive buffer for notification bursts
    const SOCKET_RCVBUF_SIZE: usize = 1024 * 1024;

    /// Async socket for link dump responses and notifications
    pub struct LinkSocket {
        inner: AsyncFd<Socket>,
        buffer: Vec<u8>,
        /// Events from an unfinished multi-part response; kept here so a
        /// cancelled `recv_events` resumes without losing anything
        pending: Vec<LinkEvent>,
        sequence: u32,
    }

    impl LinkSocket {
        /// Create the socket and join the link notification group
        pub fn new() -> Result<Self> {
            let mut socket = Socket::new(NETLINK_ROUTE)
                .map_err(|e| LinkpingError::Netlink(format!("cannot create socket: {}", e)))?;

            let addr = SocketAddr::new(0, RTMGRP_LINK);
            socket
                .bind(&addr)
                .map_err(|e| LinkpingError::Netlink(format!("cannot bind socket: {}", e)))?;

            tune_socket(&socket);

            socket
                .set_non_blocking(true)
                .map_err(|e| LinkpingError::Netlink(format!("cannot set non-blocking: {}", e)))?;

            let inner = AsyncFd::new(socket)
                .map_err(|e| LinkpingError::Netlink(format!("cannot register socket: {}", e)))?;

            debug!("link socket bound to RTMGRP_LINK");

            Ok(Self {
                inner,
                buffer: vec![0u8; RECV_BUFFER_SIZE],
                pending: Vec::new(),
                sequence: 0,
            })
        }

        /// Ask the kernel for a dump of every link
        pub fn request_dump(&mut self) -> Result<()> {
            self.sequence = self.sequence.wrapping_add(1);
            let request = link::encode_dump_request(self.sequence, std::process::id());
            self.inner
                .get_ref()
                .send(&request, 0)
                .map_err(|e| LinkpingError::Netlink(format!("cannot send dump request: {}", e)))?;
            debug!(sequence = self.sequence, "requested link dump");
            Ok(())
        }

        /// Receive one logical response: a burst of notifications, or a
        /// complete multi-part dump up to its DONE terminator
        pub async fn recv_events(&mut self) -> Result<Vec<LinkEvent>> {
            loop {
                let len = self.recv_datagram().await?;
                let batch = link::decode_batch(&self.buffer[..len]);

                for code in &batch.kernel_errors {
                    // surfaced, never fatal: monitoring continues
                    let err = LinkpingError::KernelReported(*code);
                    warn!(error = %err, "link channel error");
                }
                if batch.malformed > 0 {
                    warn!(count = batch.malformed, "discarded malformed link messages");
                }

                let expects_more = batch.expects_more();
                self.pending.extend(batch.events);
                if !expects_more {
                    return Ok(std::mem::take(&mut self.pending));
                }
            }
        }

        async fn recv_datagram(&mut self) -> Result<usize> {
            let Self { inner, buffer, .. } = self;
            loop {
                let mut guard = inner
                    .readable()
                    .await
                    .map_err(|e| LinkpingError::Netlink(format!("wait for readable: {}", e)))?;

                match guard.try_io(|fd| {
                    let mut slice = &mut buffer[..];
                    fd.get_ref().recv(&mut slice, 0)
                }) {
                    Ok(result) => {
                        return result.map_err(|e| {
                            LinkpingError::Netlink(format!("receive failed: {}", e))
                        });
                    }
                    Err(_would_block) => continue,
                }
            }
        }
    }

    /// Grow the kernel receive buffer so notification bursts are not lost
    fn tune_socket(socket: &Socket) {
        let fd = socket.as_raw_fd();
        let size = SOCKET_RCVBUF_SIZE as libc::c_int;
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &size as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            warn!("cannot set SO_RCVBUF, keeping default buffer size");
        } else {
            debug!(size = SOCKET_RCVBUF_SIZE, "set link socket receive buffer");
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::*;

/// Mock implementation for non-Linux platforms (development only)
#[cfg(not(target_os = "linux"))]
mod mock {
    use crate::error::Result;
    use crate::link::LinkEvent;
    use std::collections::VecDeque;

    pub struct LinkSocket {
        queued: VecDeque<LinkEvent>,
    }

    impl LinkSocket {
        pub fn new() -> Result<Self> {
            Ok(Self {
                queued: VecDeque::new(),
            })
        }

        pub fn request_dump(&mut self) -> Result<()> {
            Ok(())
        }

        /// Queue an event for the next `recv_events` call
        pub fn push_event(&mut self, event: LinkEvent) {
            self.queued.push_back(event);
        }

        pub async fn recv_events(&mut self) -> Result<Vec<LinkEvent>> {
            // avoid a busy loop when nothing is queued
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            Ok(self.queued.drain(..).collect())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use mock::*;
