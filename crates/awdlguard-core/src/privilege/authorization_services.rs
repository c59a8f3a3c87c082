//! Security.framework Authorization Services backend.
//!
//! `AuthorizationExecuteWithPrivileges` is deprecated but still functional;
//! a launchd privileged helper would replace it without changing the
//! [`PrivilegeBackend`] contract.

use std::ffi::{c_char, c_void, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use tracing::{debug, warn};

use super::{AuthStatus, PrivilegeBackend, RightsFlags, T_AUTH};

type OSStatus = i32;
type AuthorizationFlags = u32;

#[repr(C)]
struct AuthorizationOpaqueRef {
    _private: [u8; 0],
}

type AuthorizationRef = *const AuthorizationOpaqueRef;

#[repr(C)]
struct AuthorizationItem {
    name: *const c_char,
    value_length: usize,
    value: *mut c_void,
    flags: u32,
}

#[repr(C)]
struct AuthorizationItemSet {
    count: u32,
    items: *mut AuthorizationItem,
}

const ERR_AUTHORIZATION_SUCCESS: OSStatus = 0;
const ERR_AUTHORIZATION_DENIED: OSStatus = -60005;
const ERR_AUTHORIZATION_CANCELED: OSStatus = -60006;
const K_AUTHORIZATION_FLAG_DEFAULTS: AuthorizationFlags = 0;
const K_AUTHORIZATION_RIGHT_EXECUTE: &[u8] = b"system.privilege.admin\0";

#[link(name = "Security", kind = "framework")]
extern "C" {
    fn AuthorizationCreate(
        rights: *const AuthorizationItemSet,
        environment: *const AuthorizationItemSet,
        flags: AuthorizationFlags,
        authorization: *mut AuthorizationRef,
    ) -> OSStatus;

    fn AuthorizationCopyRights(
        authorization: AuthorizationRef,
        rights: *const AuthorizationItemSet,
        environment: *const AuthorizationItemSet,
        flags: AuthorizationFlags,
        authorized_rights: *mut *mut AuthorizationItemSet,
    ) -> OSStatus;

    fn AuthorizationFree(authorization: AuthorizationRef, flags: AuthorizationFlags) -> OSStatus;

    fn AuthorizationExecuteWithPrivileges(
        authorization: AuthorizationRef,
        path_to_tool: *const c_char,
        options: AuthorizationFlags,
        arguments: *const *mut c_char,
        communications_pipe: *mut *mut libc::FILE,
    ) -> OSStatus;
}

fn map_status(status: OSStatus) -> AuthStatus {
    match status {
        ERR_AUTHORIZATION_SUCCESS => AuthStatus::Success,
        ERR_AUTHORIZATION_CANCELED => AuthStatus::Canceled,
        ERR_AUTHORIZATION_DENIED => AuthStatus::Denied(status),
        other => AuthStatus::Failed(other),
    }
}

/// Owned `AuthorizationRef`, freed on drop.
struct AuthorizationHandle(AuthorizationRef);

impl Drop for AuthorizationHandle {
    fn drop(&mut self) {
        // SAFETY: the handle came from a successful AuthorizationCreate and is
        // freed exactly once here.
        let status = unsafe { AuthorizationFree(self.0, K_AUTHORIZATION_FLAG_DEFAULTS) };
        if status != ERR_AUTHORIZATION_SUCCESS {
            warn!(target: T_AUTH, "AuthorizationFree returned {}", status);
        }
    }
}

#[derive(Default)]
pub struct AuthorizationServices {
    handle: Option<AuthorizationHandle>,
}

impl AuthorizationServices {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PrivilegeBackend for AuthorizationServices {
    fn create(&mut self) -> AuthStatus {
        self.handle = None;

        let mut raw: AuthorizationRef = ptr::null();
        // SAFETY: null rights/environment are documented as "empty"; `raw` is
        // a valid out-pointer.
        let status = unsafe {
            AuthorizationCreate(
                ptr::null(),
                ptr::null(),
                K_AUTHORIZATION_FLAG_DEFAULTS,
                &mut raw,
            )
        };
        if status == ERR_AUTHORIZATION_SUCCESS && !raw.is_null() {
            self.handle = Some(AuthorizationHandle(raw));
        }
        map_status(status)
    }

    fn copy_rights(&mut self, flags: RightsFlags) -> AuthStatus {
        let Some(handle) = self.handle.as_ref() else {
            return AuthStatus::Failed(-1);
        };

        let mut item = AuthorizationItem {
            name: K_AUTHORIZATION_RIGHT_EXECUTE.as_ptr() as *const c_char,
            value_length: 0,
            value: ptr::null_mut(),
            flags: 0,
        };
        let rights = AuthorizationItemSet {
            count: 1,
            items: &mut item,
        };

        // SAFETY: `rights` and `item` outlive the call; a null
        // authorized_rights pointer asks the framework not to copy them out.
        let status = unsafe {
            AuthorizationCopyRights(
                handle.0,
                &rights,
                ptr::null(),
                flags.bits(),
                ptr::null_mut(),
            )
        };
        map_status(status)
    }

    fn execute(&mut self, tool: &Path, args: &[&str]) -> AuthStatus {
        let Some(handle) = self.handle.as_ref() else {
            return AuthStatus::Failed(-1);
        };

        let Ok(tool_c) = CString::new(tool.as_os_str().as_bytes()) else {
            return AuthStatus::Failed(-1);
        };
        let mut storage = Vec::with_capacity(args.len());
        for arg in args {
            match CString::new(*arg) {
                Ok(c) => storage.push(c),
                Err(_) => return AuthStatus::Failed(-1),
            }
        }
        let mut argv: Vec<*mut c_char> = storage
            .iter()
            .map(|c| c.as_ptr() as *mut c_char)
            .collect();
        argv.push(ptr::null_mut());

        // SAFETY: tool_c and storage stay alive for the duration of the call;
        // argv is NULL terminated; no communications pipe is requested.
        let status = unsafe {
            AuthorizationExecuteWithPrivileges(
                handle.0,
                tool_c.as_ptr(),
                K_AUTHORIZATION_FLAG_DEFAULTS,
                argv.as_ptr(),
                ptr::null_mut(),
            )
        };
        debug!(target: T_AUTH, "AuthorizationExecuteWithPrivileges {:?} -> {}", args, status);
        map_status(status)
    }

    fn release(&mut self) {
        self.handle = None;
    }
}
