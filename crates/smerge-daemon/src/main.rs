mod protocol;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::signal;

use smerge_core::{MergeConfig, MergeManager};
use smerge_proto::framing::r#async::{read_control_frame, read_stream_frame, write_control_frame};
use smerge_proto::framing::ControlType;
use smerge_proto::{BlockPushReturnCodeMsg, SmergeError};

use protocol::{
    Ack, ErrorReply, FetchDataReply, FetchDataRequest, FetchMetaReply, FetchMetaRequest,
    FinalizeReply, FinalizeRequest, OpenPushRequest, RegisterExecutorRequest,
};

#[derive(Parser)]
#[command(name = "smerged")]
#[command(version, about = "Push-based shuffle merge service daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (default)
    Start,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SMERGE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => start_daemon().await?,
    }

    Ok(())
}

async fn start_daemon() -> Result<()> {
    tracing::info!("smerged: starting shuffle merge service");

    let cfg = smerge_config::Config::load().unwrap_or_else(|e| {
        tracing::warn!("config load failed: {}. Using defaults.", e);
        smerge_config::Config::default()
    });

    let socket_path = cfg.socket_path().to_path_buf();
    if let Some(parent) = socket_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    if socket_path.exists() {
        tokio::fs::remove_file(&socket_path).await?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    tracing::info!(socket = %socket_path.display(), "smerged: listening");

    let manager = MergeManager::new(MergeConfig {
        min_chunk_size_in_merged_shuffle_file: cfg.merge.min_chunk_size_in_merged_shuffle_file,
        io_exceptions_threshold: cfg.merge.io_exceptions_threshold,
        merged_index_cache_size: cfg.merge.merged_index_cache_size,
    });

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _addr)) => {
                        let manager = manager.clone();
                        tokio::spawn(handle_connection(stream, manager));
                    }
                    Err(err) => {
                        tracing::error!("smerged: accept error: {}", err);
                    }
                }
            }
            _ = signal::ctrl_c() => {
                tracing::info!("smerged: shutdown signal received");
                break;
            }
        }
    }

    tracing::info!("smerged: shutting down");
    if socket_path.exists() {
        tokio::fs::remove_file(&socket_path).await?;
    }

    Ok(())
}

async fn handle_connection(mut stream: UnixStream, manager: MergeManager) {
    tracing::debug!("smerged: connection accepted");

    loop {
        let (msg_type, body) = match read_control_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "smerged: connection closed");
                return;
            }
        };

        let Some(control_type) = ControlType::from_byte(msg_type) else {
            let _ = reply_error(&mut stream, "unknown control message type").await;
            return;
        };

        let result = match control_type {
            ControlType::RegisterExecutor => handle_register(&mut stream, &manager, &body).await,
            ControlType::OpenPush => handle_push(&mut stream, &manager, &body).await,
            ControlType::FinalizeShuffleMerge => handle_finalize(&mut stream, &manager, &body).await,
            ControlType::GetMergedBlockMeta => handle_fetch_meta(&mut stream, &manager, &body).await,
            ControlType::GetMergedBlockData => handle_fetch_data(&mut stream, &manager, &body).await,
            other => {
                tracing::warn!(?other, "smerged: unexpected control message type from client");
                Err(anyhow::anyhow!("unexpected control message type"))
            }
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "smerged: request failed");
            if reply_error(&mut stream, &e.to_string()).await.is_err() {
                return;
            }
        }
    }
}

async fn handle_register(stream: &mut UnixStream, manager: &MergeManager, body: &[u8]) -> Result<()> {
    let req: RegisterExecutorRequest = serde_json::from_slice(body)?;
    manager.register_executor(&req.app_id, req.info)?;
    write_control_frame(stream, ControlType::Reply, &Ack).await?;
    Ok(())
}

async fn handle_finalize(stream: &mut UnixStream, manager: &MergeManager, body: &[u8]) -> Result<()> {
    let req: FinalizeRequest = serde_json::from_slice(body)?;
    let f = req.finalize;
    let statuses = manager.finalize_shuffle_merge(&f.app_id, f.attempt_id, f.shuffle_id, f.merge_id)?;
    write_control_frame(stream, ControlType::Reply, &FinalizeReply { statuses }).await?;
    Ok(())
}

async fn handle_fetch_meta(stream: &mut UnixStream, manager: &MergeManager, body: &[u8]) -> Result<()> {
    let req: FetchMetaRequest = serde_json::from_slice(body)?;
    let meta = manager.get_merged_block_meta(&req.app_id, req.shuffle_id, req.merge_id, req.reduce_id)?;
    write_control_frame(stream, ControlType::Reply, &FetchMetaReply { num_chunks: meta.num_chunks }).await?;
    smerge_proto::framing::r#async::write_stream_frame(stream, &meta.meta_bytes).await?;
    smerge_proto::framing::r#async::write_stream_end(stream).await?;
    Ok(())
}

async fn handle_fetch_data(stream: &mut UnixStream, manager: &MergeManager, body: &[u8]) -> Result<()> {
    let req: FetchDataRequest = serde_json::from_slice(body)?;
    let segment = manager.get_merged_block_data(&req.app_id, req.shuffle_id, req.merge_id, req.reduce_id, req.chunk_id)?;

    write_control_frame(stream, ControlType::Reply, &FetchDataReply { length: segment.length }).await?;

    let mut file = tokio::fs::File::open(&segment.path).await?;
    tokio::io::AsyncSeekExt::seek(&mut file, std::io::SeekFrom::Start(segment.offset)).await?;
    let mut remaining = segment.length;
    let mut buf = vec![0u8; 64 * 1024];
    while remaining > 0 {
        let to_read = remaining.min(buf.len() as u64) as usize;
        file.read_exact(&mut buf[..to_read]).await?;
        smerge_proto::framing::r#async::write_stream_frame(stream, &buf[..to_read]).await?;
        remaining -= to_read as u64;
    }
    smerge_proto::framing::r#async::write_stream_end(stream).await?;
    Ok(())
}

/// Reads streamed block-data frames until the end-of-stream sentinel,
/// driving `on_data`/`on_complete`/`on_failure` as bytes arrive.
async fn handle_push(stream: &mut UnixStream, manager: &MergeManager, body: &[u8]) -> Result<()> {
    let req: OpenPushRequest = serde_json::from_slice(body)?;
    let p = req.push;

    loop {
        match read_stream_frame(stream).await {
            Ok(Some(chunk)) => {
                if let Err(e) = manager.on_data(&p.app_id, p.attempt_id, p.shuffle_id, p.merge_id, p.reduce_id, p.map_index, &chunk) {
                    manager.on_failure(&p.app_id, p.attempt_id, p.shuffle_id, p.merge_id, p.reduce_id, p.map_index);
                    return reply_push_error(stream, &e, &p.stream_id()).await;
                }
            }
            Ok(None) => break,
            Err(e) => {
                manager.on_failure(&p.app_id, p.attempt_id, p.shuffle_id, p.merge_id, p.reduce_id, p.map_index);
                return Err(e.into());
            }
        }
    }

    match manager.on_complete(&p.app_id, p.attempt_id, p.shuffle_id, p.merge_id, p.reduce_id, p.map_index) {
        Ok(()) => {
            write_control_frame(stream, ControlType::Reply, &Ack).await?;
            Ok(())
        }
        Err(e) => reply_push_error(stream, &e, &p.stream_id()).await,
    }
}

async fn reply_push_error(stream: &mut UnixStream, e: &SmergeError, failure_block_id: &str) -> Result<()> {
    if let Some(code) = e.as_return_code() {
        write_control_frame(stream, ControlType::Reply, &BlockPushReturnCodeMsg::new(code, failure_block_id)).await?;
        Ok(())
    } else {
        reply_error(stream, &e.to_string()).await
    }
}

async fn reply_error(stream: &mut UnixStream, message: &str) -> Result<()> {
    write_control_frame(
        stream,
        ControlType::Error,
        &ErrorReply { message: message.to_string() },
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smerge_proto::framing::r#async::{write_stream_end, write_stream_frame};
    use smerge_proto::{BlockPushReturnCode, ExecutorShuffleInfo, FinalizeShuffleMerge, PushBlockStream};

    #[tokio::test]
    async fn push_and_finalize_over_a_real_socket_pair() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MergeManager::new(MergeConfig {
            min_chunk_size_in_merged_shuffle_file: 2,
            io_exceptions_threshold: 4,
            merged_index_cache_size: 16 * 1024 * 1024,
        });

        let (mut client, server) = UnixStream::pair().unwrap();
        tokio::spawn(handle_connection(server, manager));

        let info = ExecutorShuffleInfo {
            local_dirs: vec![dir.path().to_string_lossy().into_owned()],
            sub_dirs_per_local_dir: 4,
            shuffle_manager_meta: r#"shuffleManager:{"mergeDir": "merge_manager", "attemptId": 0}"#
                .to_string(),
        };
        write_control_frame(
            &mut client,
            ControlType::RegisterExecutor,
            &RegisterExecutorRequest { app_id: "app-1".to_string(), info },
        )
        .await
        .unwrap();
        let (ty, _) = read_control_frame(&mut client).await.unwrap();
        assert_eq!(ty, ControlType::Reply as u8);

        let push = PushBlockStream {
            app_id: "app-1".to_string(),
            attempt_id: 0,
            shuffle_id: 0,
            merge_id: 0,
            map_index: 0,
            reduce_id: 0,
            index: 0,
        };
        write_control_frame(&mut client, ControlType::OpenPush, &OpenPushRequest { push }).await.unwrap();
        write_stream_frame(&mut client, b"hello").await.unwrap();
        write_stream_end(&mut client).await.unwrap();
        let (ty, _) = read_control_frame(&mut client).await.unwrap();
        assert_eq!(ty, ControlType::Reply as u8);

        write_control_frame(
            &mut client,
            ControlType::FinalizeShuffleMerge,
            &FinalizeRequest {
                finalize: FinalizeShuffleMerge {
                    app_id: "app-1".to_string(),
                    attempt_id: 0,
                    shuffle_id: 0,
                    merge_id: 0,
                },
            },
        )
        .await
        .unwrap();
        let (ty, body) = read_control_frame(&mut client).await.unwrap();
        assert_eq!(ty, ControlType::Reply as u8);
        let reply: FinalizeReply = serde_json::from_slice(&body).unwrap();
        assert_eq!(reply.statuses.reduce_ids, vec![0]);
        assert_eq!(reply.statuses.sizes, vec![5]);

        // A push arriving after finalize is too late and carries the
        // failing block's stream id.
        let late_push = PushBlockStream {
            app_id: "app-1".to_string(),
            attempt_id: 0,
            shuffle_id: 0,
            merge_id: 0,
            map_index: 1,
            reduce_id: 0,
            index: 0,
        };
        let expected_id = late_push.stream_id();
        write_control_frame(&mut client, ControlType::OpenPush, &OpenPushRequest { push: late_push }).await.unwrap();
        write_stream_end(&mut client).await.unwrap();
        let (ty, body) = read_control_frame(&mut client).await.unwrap();
        assert_eq!(ty, ControlType::Reply as u8);
        let msg: BlockPushReturnCodeMsg = serde_json::from_slice(&body).unwrap();
        assert_eq!(msg.return_code, BlockPushReturnCode::TooLateBlockPush.code());
        assert_eq!(msg.failure_block_id, expected_id);
    }
}
