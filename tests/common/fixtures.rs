use super::setup::TestDrive;
use clouddrive_fuse::remote::RemoteIdentity;

pub const A_TXT: &[u8] = b"0123456789";

/// `/docs/a.txt` holding ten bytes, `/docs/notes/` empty, `/readme.md` at the root
pub struct DocsTree {
    pub docs: RemoteIdentity,
    pub a_txt: RemoteIdentity,
    pub notes: RemoteIdentity,
    pub readme: RemoteIdentity,
}

pub fn seed_docs(env: &TestDrive) -> DocsTree {
    let drive = env.client.drive();
    let root = env.root();
    let docs = drive.insert_dir(&root, "docs").unwrap();
    let a_txt = drive.insert_file(&docs, "a.txt", A_TXT).unwrap();
    let notes = drive.insert_dir(&docs, "notes").unwrap();
    let readme = drive.insert_file(&root, "readme.md", b"# drive\n").unwrap();
    DocsTree {
        docs,
        a_txt,
        notes,
        readme,
    }
}
