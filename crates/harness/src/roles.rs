//! Vendor user roles and the scopes a simulated login grants them.

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

const CLUSTER_READ: &str = "cluster:read";
const ORGANIZATIONS_READ: &str = "organizations:read";
const ORGANIZATIONS_WRITE: &str = "organizations:write";
const USERS_READ: &str = "users:read";
const USERS_WRITE: &str = "users:write";
const USERS_SELF: &str = "users:self";
const FILESYSTEMS_READ: &str = "filesystems:read";
const FILESYSTEMS_WRITE: &str = "filesystems:write";
const S3_READ: &str = "s3:read";
const S3_WRITE: &str = "s3:write";
const CONTAINERS_READ: &str = "containers:read";
const CONTAINERS_WRITE: &str = "containers:write";

/// Every scope the vendor API knows.
pub const ALL_SCOPES: &[&str] = &[
    CLUSTER_READ,
    ORGANIZATIONS_READ,
    ORGANIZATIONS_WRITE,
    USERS_READ,
    USERS_WRITE,
    USERS_SELF,
    FILESYSTEMS_READ,
    FILESYSTEMS_WRITE,
    S3_READ,
    S3_WRITE,
    CONTAINERS_READ,
    CONTAINERS_WRITE,
];

/// Role of a vendor user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Full control over the cluster.
    ClusterAdmin,
    /// Manages one organization.
    OrgAdmin,
    /// File system and S3 user.
    Regular,
    /// Read-only observer.
    ReadOnly,
    /// S3-only user.
    S3,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClusterAdmin => "ClusterAdmin",
            Self::OrgAdmin => "OrgAdmin",
            Self::Regular => "Regular",
            Self::ReadOnly => "ReadOnly",
            Self::S3 => "S3",
        }
    }

    /// Scopes carried by tokens issued to this role.
    #[must_use]
    pub fn scopes(self) -> BTreeSet<String> {
        let scopes: &[&str] = match self {
            Self::ClusterAdmin => ALL_SCOPES,
            Self::OrgAdmin => &[
                CLUSTER_READ,
                ORGANIZATIONS_READ,
                USERS_READ,
                USERS_WRITE,
                USERS_SELF,
                FILESYSTEMS_READ,
                FILESYSTEMS_WRITE,
                S3_READ,
                S3_WRITE,
            ],
            Self::Regular => &[USERS_SELF, FILESYSTEMS_READ, FILESYSTEMS_WRITE, S3_READ, S3_WRITE],
            Self::ReadOnly => &[
                USERS_SELF,
                CLUSTER_READ,
                ORGANIZATIONS_READ,
                USERS_READ,
                FILESYSTEMS_READ,
                S3_READ,
                CONTAINERS_READ,
            ],
            Self::S3 => &[USERS_SELF, S3_READ, S3_WRITE],
        };
        scopes.iter().map(|s| (*s).to_owned()).collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ClusterAdmin" => Ok(Self::ClusterAdmin),
            "OrgAdmin" => Ok(Self::OrgAdmin),
            "Regular" => Ok(Self::Regular),
            "ReadOnly" => Ok(Self::ReadOnly),
            "S3" => Ok(Self::S3),
            other => Err(HarnessError::backend_fault(format!("unknown role '{other}'"))),
        }
    }
}
