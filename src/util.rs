// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Utility functions shared by both scripts.

use rand::Rng;

/// Converts a display region name ("East US 2") into an Azure location name
/// ("eastus2").
pub fn normalize_location(region: &str) -> String {
    region.to_lowercase().replace(' ', "")
}

/// Returns the first line of a commit message.
pub fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or_default()
}

/// Returns the `YYYY-MM-DD` part of an ISO 8601 timestamp.
pub fn date_part(timestamp: &str) -> &str {
    timestamp.get(..10).unwrap_or(timestamp)
}

/// Fills in the `{}` placeholder of a VM size format such as
/// `Standard_F{}s_v2`.
pub fn format_vm_size(format: &str, cpu: &str) -> String {
    format.replacen("{}", cpu, 1)
}

const PASSWORD_LENGTH: usize = 36;

/// Generates an administrator password drawn from ASCII letters, digits and
/// punctuation.
pub fn generate_password() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz\
                             ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                             0123456789\
                             !\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LENGTH)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Turns a worker pool id (`domain/variant`) into a file stem.
pub fn artifact_stem(pool_id: &str) -> String {
    pool_id.replace('/', "-")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn locations_are_normalized() {
        assert_eq!(normalize_location("East US 2"), "eastus2");
        assert_eq!(normalize_location("centralus"), "centralus");
    }

    #[test]
    fn commit_fields() {
        assert_eq!(first_line("fix: thing\n\nlonger body"), "fix: thing");
        assert_eq!(first_line(""), "");
        assert_eq!(date_part("2020-05-14T12:34:56Z"), "2020-05-14");
        assert_eq!(date_part("short"), "short");
    }

    #[test]
    fn vm_size_substitutes_cpu_count() {
        assert_eq!(format_vm_size("Standard_F{}s_v2", "8"), "Standard_F8s_v2");
        assert_eq!(format_vm_size("Standard_A1", "8"), "Standard_A1");
    }

    #[test]
    fn passwords_have_fixed_length_and_charset() {
        let a = generate_password();
        assert_eq!(a.chars().count(), PASSWORD_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_graphic()));
        assert_ne!(a, generate_password());
    }

    #[test]
    fn pool_ids_become_file_stems() {
        assert_eq!(artifact_stem("gecko-t/win10-64"), "gecko-t-win10-64");
    }
}
