//! Translation of `zookeeper-client` failures into [`CoordError`].

use zookeeper_client as zk;

use crate::coord::CoordError;

/// Map a ZooKeeper error raised while operating on `path`.
pub fn map_error(path: &str, err: zk::Error) -> CoordError {
    match err {
        zk::Error::NoNode => CoordError::NoNode {
            path: path.to_owned(),
        },
        zk::Error::NodeExists => CoordError::NodeExists {
            path: path.to_owned(),
        },
        zk::Error::BadVersion => CoordError::BadVersion {
            path: path.to_owned(),
        },
        zk::Error::SessionExpired => CoordError::SessionExpired,
        zk::Error::ConnectionLoss => CoordError::ConnectionLoss {
            path: path.to_owned(),
        },
        other => CoordError::unavailable(format!("zookeeper request on `{path}` failed"), other),
    }
}
