pub mod catalog;
pub mod vanilla;

pub use catalog::VersionCatalog;
pub use vanilla::{
    DownloadInfo, LatestVersions, ReleaseType, VersionDescriptor, VersionManifest, VersionMetadata,
};
