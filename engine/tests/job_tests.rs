mod common;

use common::Harness;
use crossbeam_channel::Receiver;
use keeper_engine::{
    register_default_handlers, FileStatus, Job, JobEvent, JobStatus, JobType, Scheduler,
    VersionManager,
};
use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Collect (status, progress) pairs for one job until it completes.
fn trace(rx: &Receiver<JobEvent>, id: Uuid) -> (Vec<JobStatus>, Job) {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut statuses = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = rx.recv_timeout(remaining).expect("job event arrives");
        if event.job().id != id {
            continue;
        }
        let status = event.job().status;
        if statuses.last() != Some(&status) {
            statuses.push(status);
        }
        if let JobEvent::Completed(job) = event {
            return (statuses, job);
        }
    }
}

fn shared_manager() -> (tempfile::TempDir, Arc<VersionManager>) {
    let Harness { dir, manager } = Harness::new();
    (dir, Arc::new(manager))
}

#[test]
fn test_verify_all_lifecycle() {
    let (dir, manager) = shared_manager();
    let path = dir.path().join("work/a.txt");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"alpha").unwrap();
    let (file, _) = manager.register(&path, "v1", None).unwrap();
    fs::remove_file(&path).unwrap();

    let scheduler = Scheduler::new(1);
    register_default_handlers(&scheduler, Arc::clone(&manager));
    let events = scheduler.subscribe();

    let id = scheduler.enqueue(Job::verify_all());
    let (statuses, job) = trace(&events, id);
    assert_eq!(
        statuses,
        vec![JobStatus::Queued, JobStatus::Running, JobStatus::Completed]
    );
    assert_eq!(job.progress, 100);
    assert_eq!(job.result.unwrap()["missing"], 1);
    assert_eq!(
        manager.store().get_file(&file.id).unwrap().unwrap().status,
        FileStatus::Missing
    );
}

#[test]
fn test_cancel_while_running_yields_canceled() {
    let (dir, manager) = shared_manager();
    let path = dir.path().join("work/b.txt");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"beta").unwrap();
    let (file, _) = manager.register(&path, "v1", None).unwrap();

    let scheduler = Scheduler::new(1);
    register_default_handlers(&scheduler, Arc::clone(&manager));

    // A verify loop that keeps going until canceled.
    let passes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&passes);
    let m = Arc::clone(&manager);
    let file_id = file.id.clone();
    scheduler.register_handler(JobType::VerifyAll, move |ctx| {
        while ctx.checkpoint() {
            m.verify_file(&file_id)?;
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    });
    let events = scheduler.subscribe();

    let id = scheduler.enqueue(Job::verify_all());
    let deadline = Instant::now() + Duration::from_secs(10);
    while passes.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "handler never started");
        thread::sleep(Duration::from_millis(5));
    }

    scheduler.cancel_all();
    let (statuses, job) = trace(&events, id);
    assert_eq!(job.status, JobStatus::Canceled);
    assert!(!statuses.contains(&JobStatus::Completed));
    assert!(scheduler.running_jobs().is_empty());
}

#[test]
fn test_jobs_queued_while_paused_run_after_resume() {
    let (dir, manager) = shared_manager();
    let path = dir.path().join("work/c.txt");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"gamma").unwrap();
    let (file, _) = manager.register(&path, "v1", None).unwrap();
    fs::write(&path, b"gamma, revised").unwrap();
    manager.commit(&file.id, "v2").unwrap();

    let scheduler = Scheduler::new(2);
    register_default_handlers(&scheduler, Arc::clone(&manager));
    let events = scheduler.subscribe();

    // Both idle workers are already blocked in the queue when the gate closes.
    thread::sleep(Duration::from_millis(300));
    scheduler.pause_all();
    let id = scheduler.enqueue(Job::restore(&file.id, 1));
    thread::sleep(Duration::from_millis(300));
    assert_eq!(scheduler.queued_len(), 1);
    assert!(scheduler.running_jobs().is_empty());
    assert_eq!(fs::read(&path).unwrap(), b"gamma, revised");

    scheduler.resume_all();
    let (statuses, job) = trace(&events, id);
    assert_eq!(
        statuses,
        vec![JobStatus::Queued, JobStatus::Running, JobStatus::Completed]
    );
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(fs::read(&path).unwrap(), b"gamma");
}

#[test]
fn test_shrinking_retires_workers_after_their_job() {
    let scheduler = Scheduler::new(3);
    let events = scheduler.subscribe();

    // Three jobs that hold their worker until released.
    let started = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(AtomicBool::new(false));
    let (s, r) = (Arc::clone(&started), Arc::clone(&release));
    scheduler.register_handler(JobType::VerifyAll, move |ctx| {
        s.fetch_add(1, Ordering::SeqCst);
        while !r.load(Ordering::SeqCst) && ctx.checkpoint() {
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    });

    // Short jobs that record how many of them overlap.
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
    scheduler.register_handler(JobType::Restore, move |_| {
        let now = a.fetch_add(1, Ordering::SeqCst) + 1;
        p.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        a.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    });

    let blocking: Vec<_> = (0..3).map(|_| scheduler.enqueue(Job::verify_all())).collect();
    let deadline = Instant::now() + Duration::from_secs(10);
    while started.load(Ordering::SeqCst) < 3 {
        assert!(Instant::now() < deadline, "blocking jobs never started");
        thread::sleep(Duration::from_millis(5));
    }

    scheduler.set_worker_count(1);
    assert_eq!(scheduler.worker_count(), 1);
    assert_eq!(scheduler.running_jobs().len(), 3);

    let short: Vec<_> = (0..4).map(|_| scheduler.enqueue(Job::restore("f", 1))).collect();
    release.store(true, Ordering::SeqCst);

    let mut pending: HashSet<Uuid> = blocking.into_iter().chain(short).collect();
    let deadline = Instant::now() + Duration::from_secs(10);
    while !pending.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let JobEvent::Completed(job) = events.recv_timeout(remaining).expect("job event arrives") {
            assert_eq!(job.status, JobStatus::Completed);
            pending.remove(&job.id);
        }
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}
