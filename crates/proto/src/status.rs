//! Frame header enums. Ordinals are part of the wire format.

use std::fmt;

/// Who sent a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Client = 0,
    Ecs = 1,
    Server = 2,
}

impl Source {
    pub fn ordinal(self) -> u32 {
        self as u32
    }

    pub fn from_ordinal(n: u32) -> Option<Self> {
        match n {
            0 => Some(Self::Client),
            1 => Some(Self::Ecs),
            2 => Some(Self::Server),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "CLIENT",
            Self::Ecs => "ECS",
            Self::Server => "SERVER",
        })
    }
}

macro_rules! status_types {
    ($($variant:ident = $n:literal => $name:literal,)+) => {
        /// Request or response code carried in every frame.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusType {
            $($variant = $n,)+
        }

        impl StatusType {
            pub const ALL: &'static [StatusType] = &[$(StatusType::$variant,)+];

            pub fn ordinal(self) -> u32 {
                self as u32
            }

            pub fn from_ordinal(n: u32) -> Option<Self> {
                match n {
                    $($n => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }
    };
}

status_types! {
    Identify = 0 => "IDENTIFY",
    Info = 1 => "INFO",
    Done = 2 => "DONE",
    Fail = 3 => "FAIL",
    Get = 4 => "GET",
    Put = 5 => "PUT",
    TimedPut = 6 => "TIMED_PUT",
    Delete = 7 => "DELETE",
    Login = 8 => "LOGIN",
    SignUp = 9 => "SIGN_UP",
    GetError = 10 => "GET_ERROR",
    GetSuccess = 11 => "GET_SUCCESS",
    PutSuccess = 12 => "PUT_SUCCESS",
    PutUpdate = 13 => "PUT_UPDATE",
    PutError = 14 => "PUT_ERROR",
    TimedPutSuccess = 15 => "TIMED_PUT_SUCCESS",
    TimedPutUpdate = 16 => "TIMED_PUT_UPDATE",
    TimedPutError = 17 => "TIMED_PUT_ERROR",
    DeleteSuccess = 18 => "DELETE_SUCCESS",
    DeleteError = 19 => "DELETE_ERROR",
    LoginSuccess = 20 => "LOGIN_SUCCESS",
    LoginError = 21 => "LOGIN_ERROR",
    SignUpSuccess = 22 => "SIGN_UP_SUCCESS",
    SignUpError = 23 => "SIGN_UP_ERROR",
    ServerStopped = 24 => "SERVER_STOPPED",
    ServerWriteLock = 25 => "SERVER_WRITE_LOCK",
    ServerNotResponsible = 26 => "SERVER_NOT_RESPONSIBLE",
    DeadServer = 27 => "DEAD_SERVER",
    Init = 28 => "INIT",
    Start = 29 => "START",
    Stop = 30 => "STOP",
    Shutdown = 31 => "SHUTDOWN",
    LockWrite = 32 => "LOCK_WRITE",
    UnlockWrite = 33 => "UNLOCK_WRITE",
    Update = 34 => "UPDATE",
    MoveData = 35 => "MOVE_DATA",
    MoveDataSuccess = 36 => "MOVE_DATA_SUCCESS",
    MoveDataFail = 37 => "MOVE_DATA_FAIL",
    Replicate = 38 => "REPLICATE",
    ReplicateSuccess = 39 => "REPLICATE_SUCCESS",
    ReplicateFail = 40 => "REPLICATE_FAIL",
    AddUser = 41 => "ADD_USER",
    AddUserSuccess = 42 => "ADD_USER_SUCCESS",
    AddUserError = 43 => "ADD_USER_ERROR",
    GetAccessDenied = 44 => "GET_ACCESS_DENIED",
    UpdateAccessDenied = 45 => "UPDATE_ACCESS_DENIED",
    DeleteAccessDenied = 46 => "DELETE_ACCESS_DENIED",
    Ping = 47 => "PING",
    Pong = 48 => "PONG",
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
