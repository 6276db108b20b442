/*!
# twinmail persistent state

Two durable components back a node:

- the [`Store`]: every user, token, mailbox, outbox queue and the peer ring,
  held in memory as typed records and rewritten wholesale to one flat
  key-value document on every mutation;
- the [`Archive`]: immutable mail bodies addressed by a random [`MailId`],
  one file per mail, independent of any mailbox indexing.

All store mutations are funneled through a single writer so two concurrent
commands can never lose an update to the whole-file replace.
*/

mod archive;
mod id;
mod store;

pub use self::{
    archive::Archive,
    id::MailId,
    store::{Store, UserRecord},
};
