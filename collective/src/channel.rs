//! Session bootstrap and the in-place sum-reduction channel.

use std::{fmt, io, net::SocketAddr, time::Duration};

use log::{debug, info};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::sleep,
};

use crate::{
    error::{BootstrapErr, CollectiveErr},
    frame::{FrameReceiver, FrameSender},
};

const TOKEN_SIZE: usize = 16;
const JOIN_SIZE: usize = size_of::<u64>();

const CONNECT_ATTEMPTS: u32 = 40;
const CONNECT_BACKOFF: Duration = Duration::from_millis(250);

/// Opaque credential shared by every rank of one training session.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SessionToken([u8; TOKEN_SIZE]);

impl SessionToken {
    fn generate() -> Self {
        Self(rand::random::<u128>().to_be_bytes())
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

struct Peer {
    rx: FrameReceiver<OwnedReadHalf>,
    tx: FrameSender<OwnedWriteHalf>,
}

enum Role {
    /// The coordinator: accepts every peer, folds contributions, broadcasts.
    Hub { peers: Vec<Peer>, scratch: Vec<f32> },
    /// Any other rank: one link to the coordinator.
    Leaf { rx: FrameReceiver<OwnedReadHalf>, tx: FrameSender<OwnedWriteHalf> },
}

/// The reduction group handle held by one rank.
///
/// Lock-step discipline: every rank must issue the same sequence of
/// [`Collective::all_reduce_sum`] calls with the same element counts. A rank
/// that skips a call, reorders calls, or reduces a different length leaves
/// the whole group blocked forever — this is an invariant callers uphold,
/// not a condition detected or recovered at runtime.
pub struct Collective {
    rank: usize,
    num_ranks: usize,
    token: SessionToken,
    role: Role,
}

impl Collective {
    /// Establishes the reduction group.
    ///
    /// The coordinator (rank 0) binds `coordinator`, accepts the other
    /// `num_ranks - 1` ranks, generates one opaque session token and sends it
    /// to every peer. Every other rank connects (retrying while the
    /// coordinator is still coming up), announces its rank id and blocks
    /// until the token arrives. Any failure aborts the run: there is no
    /// partial-group training.
    pub async fn bootstrap(
        rank: usize,
        num_ranks: usize,
        coordinator: SocketAddr,
    ) -> Result<Self, BootstrapErr> {
        if num_ranks == 0 || rank >= num_ranks {
            return Err(BootstrapErr::InvalidRank { rank, num_ranks });
        }

        if rank == 0 {
            Self::bootstrap_hub(num_ranks, coordinator).await
        } else {
            Self::bootstrap_leaf(rank, num_ranks, coordinator).await
        }
    }

    async fn bootstrap_hub(num_ranks: usize, coordinator: SocketAddr) -> Result<Self, BootstrapErr> {
        let token = SessionToken::generate();
        let listener = TcpListener::bind(coordinator).await?;

        let mut slots: Vec<Option<Peer>> = (1..num_ranks).map(|_| None).collect();
        let mut joined = 0;
        while joined < num_ranks - 1 {
            let (stream, addr) = listener.accept().await?;
            stream.set_nodelay(true)?;

            let (rx, tx) = stream.into_split();
            let mut rx = FrameReceiver::new(rx);
            let tx = FrameSender::new(tx);

            let join = rx.recv_exact::<JOIN_SIZE>().await?;
            let peer_rank = u64::from_be_bytes(join) as usize;
            if peer_rank == 0 || peer_rank >= num_ranks {
                return Err(BootstrapErr::InvalidJoin { rank: peer_rank, num_ranks });
            }

            let slot = &mut slots[peer_rank - 1];
            if slot.is_some() {
                return Err(BootstrapErr::DuplicateJoin { rank: peer_rank });
            }

            debug!(rank = peer_rank; "peer joined from {addr}");
            *slot = Some(Peer { rx, tx });
            joined += 1;
        }

        // Every slot was filled exactly once, so flatten loses nothing.
        let mut peers: Vec<Peer> = slots.into_iter().flatten().collect();
        for peer in &mut peers {
            peer.tx.send_bytes(token.as_bytes()).await?;
        }

        info!(num_ranks = num_ranks; "collective session established");
        Ok(Self {
            rank: 0,
            num_ranks,
            token,
            role: Role::Hub { peers, scratch: Vec::new() },
        })
    }

    async fn bootstrap_leaf(
        rank: usize,
        num_ranks: usize,
        coordinator: SocketAddr,
    ) -> Result<Self, BootstrapErr> {
        let stream = Self::connect_with_retry(coordinator).await?;
        let (rx, tx) = stream.into_split();
        let mut rx = FrameReceiver::new(rx);
        let mut tx = FrameSender::new(tx);

        tx.send_bytes(&(rank as u64).to_be_bytes()).await?;
        let token = SessionToken(rx.recv_exact::<TOKEN_SIZE>().await?);

        debug!(rank = rank; "session token received");
        Ok(Self {
            rank,
            num_ranks,
            token,
            role: Role::Leaf { rx, tx },
        })
    }

    async fn connect_with_retry(addr: SocketAddr) -> Result<TcpStream, BootstrapErr> {
        // Process launch order is not guaranteed; the coordinator may still
        // be binding its listener when the first connect lands.
        let mut last = io::Error::other("no connection attempt made");
        for _ in 0..CONNECT_ATTEMPTS {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => {
                    last = e;
                    sleep(CONNECT_BACKOFF).await;
                }
            }
        }

        Err(BootstrapErr::Unreachable { addr, source: last })
    }

    /// In-place sum-reduction of `buf` across every rank.
    ///
    /// Blocks until all ranks have contributed; afterwards every rank holds
    /// the identical, fully-summed buffer. Contributions are folded in
    /// ascending rank order at the coordinator and the summed bytes are
    /// broadcast back, so the result is bit-for-bit the same everywhere.
    /// The caller's buffer doubles as input and output — the received sum
    /// overwrites it, so in-place use is safe in this transport.
    pub async fn all_reduce_sum(&mut self, buf: &mut [f32]) -> Result<(), CollectiveErr> {
        match &mut self.role {
            Role::Hub { peers, scratch } => {
                scratch.resize(buf.len(), 0.0);
                for peer in peers.iter_mut() {
                    peer.rx.recv_f32s_into(scratch).await?;
                    for (acc, x) in buf.iter_mut().zip(scratch.iter()) {
                        *acc += x;
                    }
                }

                for peer in peers.iter_mut() {
                    peer.tx.send_f32s(buf).await?;
                }
            }
            Role::Leaf { rx, tx } => {
                tx.send_f32s(buf).await?;
                rx.recv_f32s_into(buf).await?;
            }
        }

        Ok(())
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    pub fn session_token(&self) -> SessionToken {
        self.token
    }
}
