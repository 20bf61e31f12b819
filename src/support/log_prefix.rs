//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Postern.
//
// Postern is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3  of the License, or (at your option)
// any later version.
//
// Postern is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Postern. If not, see <http://www.gnu.org/licenses/>.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Tracks text that should be included at the start of every log statement.
///
/// Clones of a `LogPrefix` share the same underlying data, so a detail
/// learned late in the session (the HELO name, the authenticated user) shows
/// up in statements logged from any holder.
#[derive(Clone)]
pub(crate) struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    peer: String,
    session_id: String,
    helo: Option<String>,
    user: Option<String>,
}

impl LogPrefix {
    pub(crate) fn new(peer: String, session_id: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                peer,
                session_id,
                helo: None,
                user: None,
            })),
        }
    }

    pub(crate) fn set_helo(&self, helo: String) {
        self.inner.lock().unwrap().helo = Some(helo);
    }

    pub(crate) fn set_user(&self, user: String) {
        self.inner.lock().unwrap().user = Some(user);
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        write!(f, "smtp:{}/{}", inner.peer, inner.session_id)?;
        if inner.helo.is_some() || inner.user.is_some() {
            write!(f, "[{}", inner.user.as_deref().unwrap_or("<anon>"))?;
            if let Some(ref helo) = inner.helo {
                write!(f, " helo={}", helo)?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}
