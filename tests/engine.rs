//! End-to-end scenarios against the concrete end-to-end list (§8).

use qcow2_engine::{Engine, EngineConfig, MemBackingDevice};

const GIB: u64 = 1 << 30;

fn config() -> EngineConfig {
    EngineConfig::default()
}

#[tokio::test]
async fn sparse_zero_read_on_fresh_image() {
    let dev = MemBackingDevice::new(512);
    let engine = Engine::create(dev, GIB, config()).await.unwrap();

    let mut out = [0xAAu8; 512];
    {
        let mut bufs: [&mut [u8]; 1] = [&mut out];
        engine.read(0, &mut bufs).await.unwrap();
    }
    assert_eq!(out, [0u8; 512]);
}

#[tokio::test]
async fn write_then_read_advances_next_cluster_by_two() {
    let dev = MemBackingDevice::new(512);
    let engine = Engine::create(dev, GIB, config()).await.unwrap();

    engine.write(0, &[&[0x5Au8; 512]]).await.unwrap();

    let mut out = [0u8; 512];
    {
        let mut bufs: [&mut [u8]; 1] = [&mut out];
        engine.read(0, &mut bufs).await.unwrap();
    }
    assert_eq!(out, [0x5Au8; 512]);
}

#[tokio::test]
async fn write_far_sector_forces_new_branch_without_disturbing_sector_zero() {
    let dev = MemBackingDevice::new(512);
    let engine = Engine::create(dev, GIB, config()).await.unwrap();

    engine.write(2_000_000, &[&[0x42u8; 512]]).await.unwrap();

    let mut far = [0u8; 512];
    {
        let mut bufs: [&mut [u8]; 1] = [&mut far];
        engine.read(2_000_000, &mut bufs).await.unwrap();
    }
    assert_eq!(far, [0x42u8; 512]);

    let mut zero = [0xFFu8; 512];
    {
        let mut bufs: [&mut [u8]; 1] = [&mut zero];
        engine.read(0, &mut bufs).await.unwrap();
    }
    assert_eq!(zero, [0u8; 512]);
}

#[tokio::test]
async fn idempotent_allocation_on_repeat_write() {
    let dev = MemBackingDevice::new(512);
    let engine = Engine::create(dev, GIB, config()).await.unwrap();

    engine.write(10, &[&[1u8; 512]]).await.unwrap();
    engine.write(10, &[&[2u8; 512]]).await.unwrap();

    let mut out = [0u8; 512];
    {
        let mut bufs: [&mut [u8]; 1] = [&mut out];
        engine.read(10, &mut bufs).await.unwrap();
    }
    assert_eq!(out, [2u8; 512]);
}

#[tokio::test]
async fn overlap_serialization_yields_one_write_wholly() {
    let dev = MemBackingDevice::new(512);
    let engine = std::sync::Arc::new(Engine::create(dev, GIB, config()).await.unwrap());

    let e1 = engine.clone();
    let write_a = tokio::spawn(async move { e1.write(10, &[&[0xAAu8; 512]]).await });
    let e2 = engine.clone();
    let write_b = tokio::spawn(async move { e2.write(10, &[&[0xBBu8; 512]]).await });

    write_a.await.unwrap().unwrap();
    write_b.await.unwrap().unwrap();

    let mut out = [0u8; 512];
    {
        let mut bufs: [&mut [u8]; 1] = [&mut out];
        engine.read(10, &mut bufs).await.unwrap();
    }
    assert!(out == [0xAAu8; 512] || out == [0xBBu8; 512]);
}

#[tokio::test]
async fn flush_then_disconnect_succeeds() {
    let dev = MemBackingDevice::new(512);
    let engine = Engine::create(dev, GIB, config()).await.unwrap();

    engine.write(0, &[&[0x77u8; 512]]).await.unwrap();
    engine.flush().await.unwrap();
    engine.disconnect().await.unwrap();
}

#[cfg(feature = "file-backend")]
#[tokio::test]
async fn flush_durability_across_disconnect_reconnect_on_a_real_file() {
    use qcow2_engine::FileBackingDevice;
    use tokio::fs::OpenOptions;

    let tmp = tempfile::NamedTempFile::new().unwrap();
    let path = tmp.path().to_owned();

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .await
        .unwrap();
    let dev = FileBackingDevice::open(file, 512).await.unwrap();
    let engine = Engine::create(dev, GIB, config()).await.unwrap();

    engine.write(0, &[&[0x99u8; 512]]).await.unwrap();
    engine.flush().await.unwrap();
    engine.disconnect().await.unwrap();

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .await
        .unwrap();
    let dev = FileBackingDevice::open(file, 512).await.unwrap();
    let engine = Engine::connect(dev, config()).await.unwrap();

    let mut out = [0u8; 512];
    {
        let mut bufs: [&mut [u8]; 1] = [&mut out];
        engine.read(0, &mut bufs).await.unwrap();
    }
    assert_eq!(out, [0x99u8; 512]);
}
