use std::net::SocketAddr;

use collective::Collective;

/// Picks a port the kernel considers free right now. The listener is
/// dropped before the group binds it; good enough for loopback tests.
fn free_addr() -> SocketAddr {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
}

async fn spawn_group(num_ranks: usize) -> Vec<Collective> {
    let addr = free_addr();
    let handles: Vec<_> = (0..num_ranks)
        .map(|rank| tokio::spawn(Collective::bootstrap(rank, num_ranks, addr)))
        .collect();

    let mut group = Vec::with_capacity(num_ranks);
    for handle in handles {
        group.push(handle.await.unwrap().unwrap());
    }
    group
}

/// Reduces one buffer per rank concurrently and returns the results in
/// rank order.
async fn reduce_all(group: Vec<Collective>, bufs: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
    let handles: Vec<_> = group
        .into_iter()
        .zip(bufs)
        .map(|(mut chan, mut buf)| {
            tokio::spawn(async move {
                chan.all_reduce_sum(&mut buf).await.unwrap();
                buf
            })
        })
        .collect();

    let mut out = Vec::new();
    for handle in handles {
        out.push(handle.await.unwrap());
    }
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identical_inputs_sum_to_rank_count_times_value() {
    const N: usize = 4;
    let group = spawn_group(N).await;

    let bufs = vec![vec![2.5f32; 8]; N];
    let results = reduce_all(group, bufs).await;

    for result in &results {
        assert_eq!(result, &vec![10.0f32; 8]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_contributions_sum_identically_on_every_rank() {
    const N: usize = 3;
    let group = spawn_group(N).await;

    // rank r contributes r+1 everywhere: 1 + 2 + 3 = 6
    let bufs = (0..N).map(|r| vec![(r + 1) as f32; 5]).collect();
    let results = reduce_all(group, bufs).await;

    for result in &results {
        assert_eq!(result, &vec![6.0f32; 5]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_element_buffer_reduces() {
    const N: usize = 4;
    let group = spawn_group(N).await;

    let bufs = (0..N).map(|r| vec![r as f32]).collect();
    let results = reduce_all(group, bufs).await;

    for result in &results {
        assert_eq!(result, &vec![6.0f32]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn world_of_one_is_the_identity() {
    let mut group = spawn_group(1).await;
    let mut chan = group.pop().unwrap();

    let mut buf = vec![1.0f32, -3.5, 0.25];
    chan.all_reduce_sum(&mut buf).await.unwrap();
    assert_eq!(buf, vec![1.0f32, -3.5, 0.25]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_rank_holds_the_same_session_token() {
    let group = spawn_group(3).await;

    let token = group[0].session_token();
    for chan in &group {
        assert_eq!(chan.session_token(), token);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_reductions_stay_in_lock_step() {
    const N: usize = 3;
    let group = spawn_group(N).await;

    let handles: Vec<_> = group
        .into_iter()
        .map(|mut chan| {
            tokio::spawn(async move {
                let mut first = vec![1.0f32; 4];
                chan.all_reduce_sum(&mut first).await.unwrap();

                let mut second = vec![chan.rank() as f32; 2];
                chan.all_reduce_sum(&mut second).await.unwrap();

                (first, second)
            })
        })
        .collect();

    for handle in handles {
        let (first, second) = handle.await.unwrap();
        assert_eq!(first, vec![3.0f32; 4]);
        assert_eq!(second, vec![3.0f32; 2]);
    }
}
