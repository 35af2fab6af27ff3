//! Windows job object that ties a child process (and everything it spawns)
//! to the recorder's lifetime. Closing the job handle kills the whole tree,
//! so a cancelled mux or a disposed recorder cannot leak ffmpeg processes.

use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JobObjectExtendedLimitInformation,
    SetInformationJobObject, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
    JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
};

pub struct JobObject {
    handle: HANDLE,
}

// The handle is only ever closed once, from Drop.
unsafe impl Send for JobObject {}
unsafe impl Sync for JobObject {}

impl JobObject {
    pub fn new() -> Result<Self, String> {
        unsafe {
            let handle = CreateJobObjectW(None, None).map_err(|e| e.to_string())?;

            let mut info = JOBOBJECT_EXTENDED_LIMIT_INFORMATION::default();
            info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;

            if let Err(e) = SetInformationJobObject(
                handle,
                JobObjectExtendedLimitInformation,
                &info as *const _ as *const _,
                std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            ) {
                let _ = CloseHandle(handle);
                return Err(e.to_string());
            }

            Ok(Self { handle })
        }
    }

    pub fn assign_raw(&self, raw: std::os::windows::io::RawHandle) -> Result<(), String> {
        unsafe {
            let process_handle = HANDLE(raw as isize);
            AssignProcessToJobObject(self.handle, process_handle).map_err(|e| e.to_string())
        }
    }
}

impl Drop for JobObject {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

/// Best-effort: a recorder still works without the job object, it just
/// loses tree-kill on force termination.
pub(crate) fn guard_process_tree(child: &tokio::process::Child) -> Option<JobObject> {
    let raw = child.raw_handle()?;
    match JobObject::new() {
        Ok(job) => match job.assign_raw(raw) {
            Ok(()) => Some(job),
            Err(e) => {
                log::warn!("failed to assign process to job object: {}", e);
                None
            }
        },
        Err(e) => {
            log::warn!("failed to create job object: {}", e);
            None
        }
    }
}
