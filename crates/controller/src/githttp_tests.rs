// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn pkt_line_prefixes_length() {
    // "# service=git-upload-pack\n" is 26 bytes; 26 + 4 = 0x001e.
    let line = pkt_line("# service=git-upload-pack\n");
    assert!(line.starts_with(b"001e"));
    assert_eq!(&line[4..], b"# service=git-upload-pack\n");
}

#[test]
fn pkt_line_receive_pack_length() {
    let line = pkt_line("# service=git-receive-pack\n");
    assert!(line.starts_with(b"001f"));
}

#[parameterized(
    upload = { "git-upload-pack", Some(GitService::UploadPack) },
    receive = { "git-receive-pack", Some(GitService::ReceivePack) },
    archive = { "git-upload-archive", None },
    garbage = { "rm-rf", None },
)]
fn only_two_verbs_are_admitted(name: &str, expected: Option<GitService>) {
    assert_eq!(GitService::parse(name), expected);
}

#[test]
fn wire_names_roundtrip() {
    for service in [GitService::UploadPack, GitService::ReceivePack] {
        assert_eq!(GitService::parse(service.wire_name()), Some(service));
    }
}
