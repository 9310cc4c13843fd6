use anyhow::Result;

mod common;
use common::create_test_buffer_pool;

use stratumdb::storage::buffer::BufferPoolError;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    assert_eq!(page_id, 0);

    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
    }

    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_fetch_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false);

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(page_guard.page_id, page_id);
    }

    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_page_modification_persists() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }
    buffer_pool.unpin_page(page_id, true);

    // Evict the page by cycling more pages than the pool holds.
    for _ in 0..4 {
        let (_, id) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(id, false);
    }

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(&page_guard.data[100..109], b"Test Data");
    }
    buffer_pool.unpin_page(page_id, false);
    Ok(())
}

#[test]
fn test_pinned_pages_block_eviction() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let mut page_ids = Vec::new();
    for _ in 0..3 {
        let (_, page_id) = buffer_pool.new_page()?;
        page_ids.push(page_id);
    }

    // Every frame is pinned: no new page can be placed.
    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::NoAvailableFrame)
    ));
    assert!(matches!(
        buffer_pool.fetch_page(99),
        Err(BufferPoolError::NoAvailableFrame)
    ));

    buffer_pool.unpin_page(page_ids[0], false);
    let (_, new_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(new_id, false);

    for &page_id in &page_ids[1..] {
        buffer_pool.unpin_page(page_id, false);
    }
    Ok(())
}

#[test]
fn test_unpin_pairs_leave_pin_count_balanced() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (_, page_id) = buffer_pool.new_page()?;
    for _ in 0..4 {
        buffer_pool.fetch_page(page_id)?;
    }
    // Five pins were taken in total.
    for _ in 0..5 {
        assert!(buffer_pool.unpin_page(page_id, false));
    }
    // A sixth unpin has nothing left to release.
    assert!(!buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_flush_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data For Flushing";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }
    buffer_pool.unpin_page(page_id, true);

    buffer_pool.flush_page(page_id)?;

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(&page_guard.data[100..122], b"Test Data For Flushing");
    }
    buffer_pool.unpin_page(page_id, false);
    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let mut page_ids = Vec::new();
    for i in 0..5 {
        let (page, page_id) = buffer_pool.new_page()?;
        {
            let mut page_guard = page.write();
            let test_data = format!("Test Data {}", i).into_bytes();
            page_guard.data[100..100 + test_data.len()].copy_from_slice(&test_data);
        }
        buffer_pool.unpin_page(page_id, true);
        page_ids.push(page_id);
    }

    buffer_pool.flush_all_pages()?;

    for (i, &page_id) in page_ids.iter().enumerate() {
        let fetched_page = buffer_pool.fetch_page(page_id)?;
        {
            let page_guard = fetched_page.read();
            let expected = format!("Test Data {}", i).into_bytes();
            assert_eq!(&page_guard.data[100..100 + expected.len()], &expected[..]);
        }
        buffer_pool.unpin_page(page_id, false);
    }
    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;

    // Deletion refuses while the page is pinned.
    assert!(!buffer_pool.delete_page(page_id));

    buffer_pool.unpin_page(page_id, false);
    assert!(buffer_pool.delete_page(page_id));
    // Absent pages delete vacuously.
    assert!(buffer_pool.delete_page(page_id));

    // The freed frame is reusable and ids stay monotonic.
    let (_, new_page_id) = buffer_pool.new_page()?;
    assert!(new_page_id > page_id);
    buffer_pool.unpin_page(new_page_id, false);
    Ok(())
}

#[test]
fn test_guarded_fetch_unpins_on_scope_exit() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let page_id = {
        let mut guard = buffer_pool.new_page_guarded()?;
        let page_id = guard.page_id();
        guard.write().data[0] = 0x11;
        page_id
    };

    {
        let read_guard = buffer_pool.fetch_page_read(page_id)?;
        assert_eq!(read_guard.data().data[0], 0x11);
    }

    {
        let mut write_guard = buffer_pool.fetch_page_write(page_id)?;
        write_guard.data_mut().data[0] = 0x22;
    }

    // All guards released their pins: the page can be deleted.
    assert!(buffer_pool.delete_page(page_id));
    Ok(())
}

#[test]
fn test_lru_k_prefers_cold_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let (_, id) = buffer_pool.new_page()?;
        ids.push(id);
    }
    for &id in &ids {
        buffer_pool.unpin_page(id, false);
    }

    // Touch the first two pages repeatedly so they mature under k = 2.
    for _ in 0..2 {
        for &id in &ids[..2] {
            buffer_pool.fetch_page(id)?;
            buffer_pool.unpin_page(id, false);
        }
    }

    // The next allocation must evict the cold third page.
    let (_, new_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(new_id, false);

    // Hot pages are still resident (refetching them does not error even
    // though the pool is tight).
    for &id in &ids[..2] {
        buffer_pool.fetch_page(id)?;
        buffer_pool.unpin_page(id, false);
    }
    Ok(())
}
