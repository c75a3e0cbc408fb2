//! Path addressing: `"pane:/a/b"` is absolute, `"../b"` and `"b/c"` are
//! relative to the node resolving them, and a leading `/` starts at that
//! node's root. `.` is the current node and `..` its parent.

use arbor_core::{Error, Result};
use smallvec::SmallVec;

use crate::node::NodeId;
use crate::scene::Scene;

impl Scene {
    /// Resolves `path` starting from `from`.
    pub fn path(&self, from: NodeId, path: &str) -> Result<NodeId> {
        if path.contains(':') {
            return self.resolve(path);
        }
        let start = if path.starts_with('/') {
            self.root_of(from)?
        } else if self.is_live(from) {
            from
        } else {
            return Err(Error::StaleNode(format!("{from:?}")));
        };
        self.walk(start, path, path)
    }

    /// Resolves an absolute `pane:/a/b` path.
    pub fn resolve(&self, path: &str) -> Result<NodeId> {
        let Some((pane, rest)) = path.split_once(':') else {
            return Err(Error::path_not_found(path, path));
        };
        let root = self
            .get_pane(pane)
            .ok_or_else(|| Error::path_not_found(path, format!("{pane}:")))?;
        self.walk(root, path, rest)
    }

    /// Canonical absolute path: `"pane:"` for a pane root, `"pane:/g/c"` below it.
    pub fn full_path(&self, id: NodeId) -> Result<String> {
        let mut names: SmallVec<[&str; 8]> = SmallVec::new();
        let mut cur = self.node(id)?;
        while let Some(parent) = cur.parent {
            names.push(&cur.name);
            cur = self.node(parent)?;
        }
        let mut out = format!("{}:", cur.name);
        for name in names.iter().rev() {
            out.push('/');
            out.push_str(name);
        }
        Ok(out)
    }

    fn root_of(&self, id: NodeId) -> Result<NodeId> {
        let mut cur = id;
        while let Some(parent) = self.node(cur)?.parent {
            cur = parent;
        }
        Ok(cur)
    }

    fn walk(&self, start: NodeId, path: &str, rest: &str) -> Result<NodeId> {
        let mut cur = start;
        for segment in rest.split('/') {
            cur = match segment {
                "" | "." => cur,
                ".." => self
                    .node(cur)?
                    .parent
                    .ok_or_else(|| Error::path_not_found(path, ".."))?,
                name => self
                    .child(cur, name)
                    .ok_or_else(|| Error::path_not_found(path, name))?,
            };
        }
        Ok(cur)
    }
}
