// Copyright © 2025 Cyberus Technology GmbH
//
// SPDX-License-Identifier: Apache-2.0
//

#[cfg(test)]
pub mod tests {
    use std::cmp::Ordering;

    use clap::Command;

    /// Checks that the options of `cmd` and of every subcommand are declared
    /// in alphabetical order. Positional arguments keep their own order.
    pub fn assert_args_sorted(cmd: &Command) {
        let options: Vec<_> = cmd.get_arguments().filter(|a| !a.is_positional()).collect();
        for (arg, next) in options.iter().zip(options.iter().skip(1)) {
            assert_ne!(
                arg.get_id().cmp(next.get_id()),
                Ordering::Greater,
                "args of {} not alphabetically sorted: arg={}, next={}",
                cmd.get_name(),
                arg.get_id(),
                next.get_id()
            );
        }
        cmd.get_subcommands().for_each(assert_args_sorted);
    }
}
