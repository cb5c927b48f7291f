//! 视频流接入: 回环端口模拟设备, 验证握手与帧分发

use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rashplayer::error::{DecodeError, StreamError};
use rashplayer::input::{
    ConnectOptions, DecodedFrame, DecoderFactory, DirectTunnel, FrameDecoder, StreamClient,
};
use rashplayer::CaptureHub;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 每个访问单元输出一张 4x4 灰图
struct FakeDecoder;

impl FrameDecoder for FakeDecoder {
    fn decode(&mut self, _au: &[u8]) -> Result<Option<DecodedFrame>, DecodeError> {
        Ok(Some(DecodedFrame {
            rgba_data: Arc::new(vec![128; 4 * 4 * 4]),
            width: 4,
            height: 4,
        }))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

fn fake_factory() -> DecoderFactory {
    Arc::new(|| Ok(Box::new(FakeDecoder) as Box<dyn FrameDecoder>))
}

fn header(name: &str, width: u16, height: u16) -> Vec<u8> {
    let mut hdr = vec![0u8; 64];
    hdr[..name.len()].copy_from_slice(name.as_bytes());
    hdr.extend_from_slice(&width.to_be_bytes());
    hdr.extend_from_slice(&height.to_be_bytes());
    hdr
}

/// 启动一个只接受一次连接的假设备
fn fake_device<F>(serve: F) -> (SocketAddr, thread::JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (sock, _) = listener.accept().unwrap();
        serve(sock);
    });
    (addr, handle)
}

fn client(addr: SocketAddr) -> StreamClient {
    let options = ConnectOptions {
        retries: 3,
        retry_delay_ms: 20,
        handshake_timeout_ms: 2000,
        ..Default::default()
    };
    StreamClient::new(Box::new(DirectTunnel::new(addr)), options).with_decoder(fake_factory())
}

#[test]
fn test_handshake_reports_device_geometry() {
    init_logger();
    let (addr, device) = fake_device(|mut s| {
        let mut hdr = vec![0u8; 64];
        hdr[..7].copy_from_slice(b"Pixel 7");
        hdr.extend_from_slice(&[0x04, 0x38, 0x07, 0x80]);
        s.write_all(&hdr).unwrap();
        thread::sleep(Duration::from_millis(100));
    });

    let mut client = client(addr);
    let info = client.start().unwrap();
    assert_eq!(info.device_name, "Pixel 7");
    assert_eq!((info.width, info.height), (1080, 1920));
    assert_eq!(client.info(), Some(&info));

    device.join().unwrap();
    client.stop();
    assert!(!client.is_running());
}

#[test]
fn test_handshake_split_across_writes() {
    init_logger();
    let (addr, device) = fake_device(|mut s| {
        for byte in header("emulator-5554", 720, 1280) {
            s.write_all(&[byte]).unwrap();
            s.flush().unwrap();
        }
        thread::sleep(Duration::from_millis(100));
    });

    let mut client = client(addr);
    let info = client.start().unwrap();
    assert_eq!(info.device_name, "emulator-5554");
    assert_eq!((info.width, info.height), (720, 1280));
    device.join().unwrap();
}

#[test]
fn test_zero_dimension_is_protocol_error() {
    init_logger();
    let (addr, device) = fake_device(|mut s| {
        s.write_all(&header("broken", 0, 1920)).unwrap();
        thread::sleep(Duration::from_millis(100));
    });

    let mut client = client(addr);
    assert!(matches!(client.start(), Err(StreamError::Protocol(_))));
    assert!(!client.is_running());
    device.join().unwrap();
}

#[test]
fn test_truncated_handshake_is_protocol_error() {
    init_logger();
    let (addr, device) = fake_device(|mut s| {
        s.write_all(&[0u8; 30]).unwrap();
    });

    let mut client = client(addr);
    assert!(matches!(client.start(), Err(StreamError::Protocol(_))));
    device.join().unwrap();
}

#[test]
fn test_hub_isolates_failing_subscriber() {
    init_logger();
    let (addr, device) = fake_device(|mut s| {
        s.write_all(&header("emu", 4, 4)).unwrap();
        let idr = [0u8, 0, 0, 1, 0x65, 0x88, 0x01];
        let p1 = [0u8, 0, 0, 1, 0x41, 0x9a, 0x02];
        let p2 = [0u8, 0, 0, 1, 0x41, 0x9a, 0x03];
        s.write_all(&[&idr[..], &p1[..], &p2[..]].concat()).unwrap();
    });

    let hub = CaptureHub::new();
    let first = Arc::new(AtomicUsize::new(0));
    let third = Arc::new(AtomicUsize::new(0));
    {
        let first = Arc::clone(&first);
        hub.subscribe(move |_| {
            first.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    hub.subscribe(|frame| anyhow::bail!("rejecting frame #{}", frame.frame_number));
    {
        let third = Arc::clone(&third);
        hub.subscribe(move |_| {
            third.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let (end_tx, end_rx) = crossbeam_channel::bounded(1);
    let mut client = client(addr);
    client.set_end_callback(move |end| {
        let _ = end_tx.send(end);
    });
    let info = hub.start(&mut client).unwrap();
    assert_eq!((info.width, info.height), (4, 4));

    device.join().unwrap();
    end_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    hub.stop(&mut client);

    let frames = hub.stats().frames as usize;
    assert_eq!(frames, 3);
    assert_eq!(first.load(Ordering::SeqCst), frames);
    assert_eq!(third.load(Ordering::SeqCst), frames);
    assert_eq!(hub.stats().failures as usize, frames);
    assert_eq!(hub.latest_frame().map(|f| f.frame_number), Some(3));
}
